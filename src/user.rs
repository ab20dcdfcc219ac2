use std::collections::HashMap;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use log::info;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::{Role, User};

#[derive(Debug, Error)]
pub enum UserError {
    #[error("username '{0}' is already in use")]
    AlreadyExists(String),

    #[error("username '{0}' not found")]
    NotFound(String),

    #[error("incorrect password")]
    WrongPassword,

    #[error("{0}")]
    Invalid(&'static str),

    #[error("password hashing failed: {0}")]
    Hash(String),
}

/// In-memory directory of registered users.
///
/// Logins take the read side of the guard and registrations the write side.
/// Hashing runs on the blocking pool, outside the guard.
pub struct UserStore {
    users: RwLock<HashMap<String, User>>,
    hasher: Argon2<'static>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::with_hasher(Argon2::default())
    }

    /// Argon2id with explicit cost parameters.
    pub fn with_params(params: Params) -> Self {
        Self::with_hasher(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    pub fn with_hasher(hasher: Argon2<'static>) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            hasher,
        }
    }

    pub async fn create(&self, username: &str, password: &str) -> Result<(), UserError> {
        if username.trim().is_empty() {
            return Err(UserError::Invalid("username cannot be empty"));
        }
        if password.is_empty() {
            return Err(UserError::Invalid("password cannot be empty"));
        }
        if self.exists(username).await {
            return Err(UserError::AlreadyExists(username.to_owned()));
        }

        let password_hash = self.hash(password.to_owned()).await?;

        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(UserError::AlreadyExists(username.to_owned()));
        }
        users.insert(
            username.to_owned(),
            User {
                username: username.to_owned(),
                password_hash,
                per_channel_role: HashMap::new(),
            },
        );
        info!("New user {} created", username);
        Ok(())
    }

    /// Checks a login attempt and returns the matching user.
    pub async fn verify(&self, username: &str, password: &str) -> Result<User, UserError> {
        let user = self
            .get(username)
            .await
            .ok_or_else(|| UserError::NotFound(username.to_owned()))?;

        let hasher = self.hasher.clone();
        let stored = user.password_hash.clone();
        let password = password.to_owned();
        let matches = tokio::task::spawn_blocking(move || {
            PasswordHash::new(&stored)
                .map(|parsed| hasher.verify_password(password.as_bytes(), &parsed).is_ok())
                .map_err(|e| UserError::Hash(e.to_string()))
        })
        .await
        .map_err(|e| UserError::Hash(e.to_string()))??;

        if matches {
            Ok(user)
        } else {
            Err(UserError::WrongPassword)
        }
    }

    pub async fn get(&self, username: &str) -> Option<User> {
        self.users.read().await.get(username).cloned()
    }

    pub async fn exists(&self, username: &str) -> bool {
        self.users.read().await.contains_key(username)
    }

    /// Mirrors a channel role onto the user record. Unknown users are ignored.
    pub async fn set_channel_role(&self, username: &str, channel_id: u64, role: Role) {
        if let Some(user) = self.users.write().await.get_mut(username) {
            user.per_channel_role.insert(channel_id, role);
        }
    }

    pub async fn forget_channel(&self, channel_id: u64) {
        for user in self.users.write().await.values_mut() {
            user.per_channel_role.remove(&channel_id);
        }
    }

    async fn hash(&self, password: String) -> Result<String, UserError> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            hasher
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| UserError::Hash(e.to_string()))
        })
        .await
        .map_err(|e| UserError::Hash(e.to_string()))?
    }
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}
