use std::marker::PhantomData;

use log::info;
use rocket::{
    http::Status,
    post,
    request::{FromRequest, Outcome, Request},
    serde::json::Json,
    State,
};
use serde::{Deserialize, Serialize};

use crate::error::RpcError;
use crate::gate::{methods, Caller, Metadata};
use crate::models::Claims;
use crate::AppState;

/// A remote method, named the way the authorization gate knows it.
pub trait RpcMethod: Send + Sync + 'static {
    const NAME: &'static str;
}

macro_rules! rpc_methods {
    ($($ty:ident => $name:expr),* $(,)?) => {
        $(
            pub struct $ty;

            impl RpcMethod for $ty {
                const NAME: &'static str = $name;
            }
        )*
    };
}

rpc_methods! {
    CreateUser => methods::CREATE_USER,
    Login => methods::LOGIN,
    Logout => methods::LOGOUT,
    AddChannel => methods::ADD_CHANNEL,
    RemoveChannel => methods::REMOVE_CHANNEL,
    ListChannels => methods::LIST_CHANNELS,
}

fn metadata(req: &Request<'_>) -> Metadata {
    req.headers()
        .iter()
        .map(|h| (h.name().as_str().to_owned(), h.value().to_owned()))
        .collect()
}

fn app_state<'r>(req: &'r Request<'_>) -> Result<&'r AppState, RpcError> {
    req.rocket()
        .state::<AppState>()
        .ok_or_else(|| RpcError::internal("server is not configured", "AppState is not managed"))
}

/// The call passed the gate for `M`. Open methods carry no claims.
pub struct Gated<M> {
    pub claims: Option<Claims>,
    _method: PhantomData<M>,
}

#[rocket::async_trait]
impl<'r, M: RpcMethod> FromRequest<'r> for Gated<M> {
    type Error = RpcError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let result = app_state(req).and_then(|state| state.gate.authorize(M::NAME, &metadata(req)));
        match result {
            Ok(claims) => Outcome::Success(Gated {
                claims,
                _method: PhantomData,
            }),
            Err(e) => Outcome::Error((e.code.http_status(), e)),
        }
    }
}

/// The call passed the gate for `M` and has a known caller.
pub struct Authenticated<M> {
    pub caller: Caller,
    _method: PhantomData<M>,
}

#[rocket::async_trait]
impl<'r, M: RpcMethod> FromRequest<'r> for Authenticated<M> {
    type Error = RpcError;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let result = app_state(req).and_then(|state| state.gate.identify(M::NAME, &metadata(req)));
        match result {
            Ok(caller) => Outcome::Success(Authenticated {
                caller,
                _method: PhantomData,
            }),
            Err(e) => Outcome::Error((e.code.http_status(), e)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
}

#[post("/users", data = "<input>")]
pub async fn create_user(
    state: &State<AppState>,
    gate: Result<Gated<CreateUser>, RpcError>,
    input: Json<Credentials>,
) -> Result<Status, RpcError> {
    gate?;
    state.users.create(&input.username, &input.password).await?;
    Ok(Status::Created)
}

#[post("/login", data = "<input>")]
pub async fn login(
    state: &State<AppState>,
    gate: Result<Gated<Login>, RpcError>,
    input: Json<Credentials>,
) -> Result<Json<LoginResponse>, RpcError> {
    gate?;
    let user = state.users.verify(&input.username, &input.password).await?;
    let access_token = state
        .tokens
        .generate(&user.username, state.config.default_token_role)?;
    info!("{} logged in", user.username);
    Ok(Json(LoginResponse { access_token }))
}

/// Tokens are stateless and cannot be revoked before they expire.
#[post("/logout")]
pub async fn logout(gate: Result<Gated<Logout>, RpcError>) -> Result<Status, RpcError> {
    gate?;
    Err(RpcError::unimplemented(
        "logout is not supported: access tokens stay valid until they expire",
    ))
}
