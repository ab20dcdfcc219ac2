use log::info;

use super::ChannelRegistry;
use crate::chat::{ChannelActor, ChannelHandle};

impl ChannelRegistry {
    /// Starts a new channel owned by `creator` and returns its handle.
    pub async fn create(&self, name: &str, is_public: bool, creator: &str) -> ChannelHandle {
        let mut channels = self.inner.write().await;
        let id = channels.next_id;
        channels.next_id += 1;

        let handle = ChannelActor::spawn(id, name, is_public, creator, self.users.clone(), self.queue);
        channels.live.insert(id, handle.clone());
        drop(channels);

        info!(
            "Channel {} '{}' created by {} ({})",
            id,
            name,
            creator,
            if is_public { "public" } else { "private" }
        );
        handle
    }
}
