//! Authorization gate shared by the unary routes and the stream handshake.
//!
//! Every remote method may have an allow-list of roles. A method with no
//! allow-list (or an empty one) is open to everyone, including callers that
//! present no token at all. Otherwise the caller must present a bearer token
//! under the `authorization` metadata key, the token must verify, and its
//! role claim must be on the list.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};

use crate::error::RpcError;
use crate::models::{Claims, Role};
use crate::token::TokenService;
use crate::utils::bearer_token;

pub const AUTHORIZATION: &str = "authorization";
pub const USERNAME: &str = "username";

/// Remote method names as the gate knows them.
pub mod methods {
    pub const CREATE_USER: &str = "CreateUser";
    pub const LOGIN: &str = "Login";
    pub const LOGOUT: &str = "Logout";
    pub const ADD_CHANNEL: &str = "AddChannel";
    pub const REMOVE_CHANNEL: &str = "RemoveChannel";
    pub const LIST_CHANNELS: &str = "ListChannels";
    pub const CHANNEL_STREAM: &str = "ChannelStream";
}

/// Call metadata with case-insensitive keys.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .entry(key.as_ref().to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// First value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(&key.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut md = Metadata::new();
        for (key, value) in iter {
            md.insert(key, value);
        }
        md
    }
}

/// The identity a call runs as once the gate has let it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub username: String,
    pub claims: Option<Claims>,
}

pub struct AuthGate {
    tokens: Arc<TokenService>,
    allowed: HashMap<String, Vec<Role>>,
}

impl AuthGate {
    /// A gate with no rules: every method is open.
    pub fn new(tokens: Arc<TokenService>) -> Self {
        Self {
            tokens,
            allowed: HashMap::new(),
        }
    }

    /// Channel methods require any real role; account methods stay open.
    pub fn with_default_rules(tokens: Arc<TokenService>) -> Self {
        let signed_in = [Role::Subscriber, Role::Member, Role::Admin, Role::Superadmin];
        Self::new(tokens)
            .allow(methods::ADD_CHANNEL, signed_in)
            .allow(methods::REMOVE_CHANNEL, signed_in)
            .allow(methods::LIST_CHANNELS, signed_in)
            .allow(methods::CHANNEL_STREAM, signed_in)
    }

    pub fn allow(mut self, method: &str, roles: impl IntoIterator<Item = Role>) -> Self {
        self.allowed
            .insert(method.to_owned(), roles.into_iter().collect());
        self
    }

    /// Returns the verified claims for gated methods and `None` for open ones.
    pub fn authorize(&self, method: &str, md: &Metadata) -> Result<Option<Claims>, RpcError> {
        let allowed = match self.allowed.get(method) {
            Some(roles) if !roles.is_empty() => roles,
            _ => return Ok(None),
        };

        let token = md
            .get(AUTHORIZATION)
            .map(bearer_token)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                warn!("{method}: rejected call without authorization token");
                RpcError::unauthenticated("authorization token is not provided")
            })?;

        let claims = self.tokens.verify(token).map_err(|e| {
            warn!("{method}: rejected token: {e}");
            RpcError::from(e)
        })?;

        if allowed.contains(&claims.role) {
            debug!("{method}: authorized {} as {}", claims.sub, claims.role);
            Ok(Some(claims))
        } else {
            warn!("{method}: {} with role {} is not allowed", claims.sub, claims.role);
            Err(RpcError::permission_denied(
                "no permission to access this RPC",
            ))
        }
    }

    /// Authorizes the call and resolves who is making it.
    ///
    /// The verified token subject wins; only tokenless calls to open methods
    /// fall back to the `username` metadata key.
    pub fn identify(&self, method: &str, md: &Metadata) -> Result<Caller, RpcError> {
        let claims = self.authorize(method, md)?;
        let username = match &claims {
            Some(claims) => claims.sub.clone(),
            None => md.get(USERNAME).unwrap_or_default().trim().to_owned(),
        };
        if username.is_empty() {
            return Err(RpcError::invalid_argument("username cannot be empty"));
        }
        Ok(Caller { username, claims })
    }
}
