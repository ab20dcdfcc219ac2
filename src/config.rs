use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::anyhow;
use log::warn;

use crate::models::Role;

const DEV_SECRET: &str = "accord-development-secret-change-me";

/// Server settings, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    pub jwt_secret: String,
    pub token_ttl: Duration,
    pub stream_addr: SocketAddr,
    pub channel_queue: usize,
    pub subscriber_buffer: usize,
    pub default_token_role: Role,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_SECRET.to_owned(),
            token_ttl: Duration::from_secs(15 * 60),
            stream_addr: SocketAddr::from(([0, 0, 0, 0], 34093)),
            channel_queue: 128,
            subscriber_buffer: 64,
            default_token_role: Role::Member,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET is not set, using the development secret");
            defaults.jwt_secret.clone()
        });

        Ok(Self {
            jwt_secret,
            token_ttl: Duration::from_secs(parse_var("TOKEN_TTL_SECS", 15 * 60)?),
            stream_addr: parse_var("STREAM_ADDR", defaults.stream_addr)?,
            channel_queue: parse_var("CHANNEL_QUEUE", defaults.channel_queue)?,
            subscriber_buffer: parse_var("SUBSCRIBER_BUFFER", defaults.subscriber_buffer)?,
            default_token_role: parse_var("DEFAULT_TOKEN_ROLE", defaults.default_token_role)?,
        })
    }
}

fn parse_var<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {key}: {raw:?} ({e})")),
        Err(_) => Ok(default),
    }
}
