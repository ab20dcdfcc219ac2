pub mod add;
pub mod get;
pub mod remove;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;

use crate::chat::ChannelHandle;
use crate::user::UserStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("channel with ID {0} doesn't exist")]
    NotFound(u64),

    #[error("channel {0} has been removed")]
    Stopped(u64),
}

/// Live channels by id.
///
/// Ids start at 0 and only grow; a removed id is never handed out again.
/// Lookups take the read side of the guard, create and remove the write side.
#[derive(Clone)]
pub struct ChannelRegistry {
    inner: Arc<RwLock<Channels>>,
    users: Arc<UserStore>,
    queue: usize,
}

#[derive(Default)]
struct Channels {
    next_id: u64,
    live: HashMap<u64, ChannelHandle>,
}

impl ChannelRegistry {
    /// `queue` bounds each channel's inbound command queue.
    pub fn new(users: Arc<UserStore>, queue: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Channels::default())),
            users,
            queue,
        }
    }
}
