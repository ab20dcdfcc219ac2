use std::fmt;

use log::error;
use rocket::http::Status;
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::StreamStatus;
use crate::registry::RegistryError;
use crate::token::TokenError;
use crate::user::UserError;

/// Call outcome codes shared by the unary routes and the channel stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code {
    Canceled,
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Unimplemented,
    Internal,
    Unavailable,
}

impl Code {
    pub fn http_status(self) -> Status {
        match self {
            Code::Canceled => Status::new(499),
            Code::InvalidArgument => Status::BadRequest,
            Code::NotFound => Status::NotFound,
            Code::AlreadyExists => Status::Conflict,
            Code::PermissionDenied => Status::Forbidden,
            Code::Unauthenticated => Status::Unauthorized,
            Code::Unimplemented => Status::NotImplemented,
            Code::Internal => Status::InternalServerError,
            Code::Unavailable => Status::ServiceUnavailable,
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: Code,
    pub message: String,
}

impl RpcError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(Code::Unauthenticated, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(Code::PermissionDenied, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(Code::Canceled, message)
    }

    /// Logs `detail` and returns an error whose message carries none of it.
    pub fn internal(context: &str, detail: impl fmt::Display) -> Self {
        error!("{context}: {detail}");
        Self::new(Code::Internal, context)
    }

    /// The status as a client may see it.
    pub fn to_status(&self) -> StreamStatus {
        StreamStatus {
            code: self.code,
            message: self.message.clone(),
        }
    }
}

impl<'r> Responder<'r, 'static> for RpcError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'static> {
        let status = self.code.http_status();
        Response::build_from(Json(self.to_status()).respond_to(req)?)
            .status(status)
            .ok()
    }
}

impl From<TokenError> for RpcError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Signing(e) => RpcError::internal("cannot generate access token", e),
            other => RpcError::unauthenticated(format!("access token is invalid: {other}")),
        }
    }
}

impl From<UserError> for RpcError {
    fn from(err: UserError) -> Self {
        match err {
            UserError::AlreadyExists(_) => RpcError::new(Code::AlreadyExists, err.to_string()),
            UserError::NotFound(_) => RpcError::not_found(err.to_string()),
            UserError::WrongPassword | UserError::Invalid(_) => {
                RpcError::invalid_argument(err.to_string())
            }
            UserError::Hash(ref detail) => {
                log::warn!("password hashing failed: {detail}");
                RpcError::invalid_argument("password could not be hashed")
            }
        }
    }
}

impl From<RegistryError> for RpcError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => RpcError::not_found(err.to_string()),
            RegistryError::Stopped(_) => RpcError::not_found(err.to_string()),
        }
    }
}
