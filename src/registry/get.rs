use super::{ChannelRegistry, RegistryError};
use crate::chat::ChannelHandle;
use crate::models::ChannelSummary;

impl ChannelRegistry {
    pub async fn lookup(&self, id: u64) -> Result<ChannelHandle, RegistryError> {
        self.inner
            .read()
            .await
            .live
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// Handles of every live channel, ordered by id.
    pub async fn handles(&self) -> Vec<ChannelHandle> {
        let mut handles: Vec<ChannelHandle> =
            self.inner.read().await.live.values().cloned().collect();
        handles.sort_by_key(ChannelHandle::id);
        handles
    }

    /// Channels `username` can see: every public one plus the private ones
    /// it is a member of.
    pub async fn visible_to(&self, username: &str) -> Vec<ChannelSummary> {
        let mut summaries = Vec::new();
        for handle in self.handles().await {
            // Removed between listing and asking; skip it.
            let Ok(snapshot) = handle.snapshot().await else {
                continue;
            };
            if snapshot.is_public || snapshot.members.contains_key(username) {
                summaries.push(ChannelSummary {
                    id: snapshot.id,
                    name: snapshot.name,
                    is_public: snapshot.is_public,
                });
            }
        }
        summaries
    }
}
