#![allow(dead_code)]

use std::time::Duration;

use accord_chat::config::Config;
use accord_chat::models::Role;
use accord_chat::user::UserStore;
use accord_chat::{ws, AppState};
use argon2::Params;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Cheap hashing so tests don't spend their time in argon2.
pub fn fast_users() -> UserStore {
    UserStore::with_params(Params::new(Params::MIN_M_COST, 1, 1, None).unwrap())
}

pub fn state() -> AppState {
    AppState::with_users(Config::default(), fast_users())
}

pub struct StreamServer {
    pub state: AppState,
    pub url: String,
    pub shutdown: CancellationToken,
}

impl StreamServer {
    pub async fn start() -> Self {
        let state = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(ws::serve(listener, state.clone(), shutdown.clone()));
        Self {
            state,
            url,
            shutdown,
        }
    }

    pub fn token(&self, username: &str) -> String {
        self.state.tokens.generate(username, Role::Member).unwrap()
    }
}

/// Polls `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
