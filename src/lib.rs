#[macro_use]
extern crate rocket;

use std::sync::Arc;

use rocket::http::Status;
use rocket::{Build, Request, Rocket};

pub mod auth;
pub mod bridge;
pub mod channels;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod models;
pub mod permissions;
pub mod registry;
pub mod token;
pub mod user;
pub mod utils;
pub mod ws;

use config::Config;
use error::{Code, RpcError};
use gate::AuthGate;
use registry::ChannelRegistry;
use token::TokenService;
use user::UserStore;

/// Everything the routes and the stream server share.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub users: Arc<UserStore>,
    pub registry: ChannelRegistry,
    pub gate: Arc<AuthGate>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self::with_users(config, UserStore::new())
    }

    pub fn with_users(config: Config, users: UserStore) -> Self {
        let tokens = Arc::new(TokenService::new(
            config.jwt_secret.as_bytes(),
            config.token_ttl,
        ));
        let users = Arc::new(users);
        let registry = ChannelRegistry::new(users.clone(), config.channel_queue);
        let gate = Arc::new(AuthGate::with_default_rules(tokens.clone()));

        Self {
            config: Arc::new(config),
            tokens,
            users,
            registry,
            gate,
        }
    }

    /// Replaces the authorization rules. The gate should share `self.tokens`.
    pub fn with_gate(mut self, gate: AuthGate) -> Self {
        self.gate = Arc::new(gate);
        self
    }
}

/// Rocket's own failures (bad JSON, unknown route) in the same `{code, message}` shape.
#[catch(default)]
fn json_catcher(status: Status, _req: &Request<'_>) -> RpcError {
    let code = match status.code {
        400 | 422 => Code::InvalidArgument,
        401 => Code::Unauthenticated,
        403 => Code::PermissionDenied,
        404 => Code::NotFound,
        501 => Code::Unimplemented,
        503 => Code::Unavailable,
        _ => Code::Internal,
    };
    RpcError::new(code, status.reason_lossy())
}

pub fn rocket(state: AppState) -> Rocket<Build> {
    rocket::build()
        .manage(state)
        .mount(
            "/auth",
            routes![auth::create_user, auth::login, auth::logout],
        )
        .mount(
            "/chat",
            routes![
                channels::add_channel,
                channels::remove_channel,
                channels::list_channels
            ],
        )
        .register("/", catchers![json_catcher])
}
