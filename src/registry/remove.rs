use log::info;

use super::{ChannelRegistry, RegistryError};

impl ChannelRegistry {
    /// Unregisters the channel and stops its actor, waiting until the actor
    /// has cleared its role mirror. Its id stays retired.
    pub async fn remove(&self, id: u64) -> Result<(), RegistryError> {
        let handle = self
            .inner
            .write()
            .await
            .live
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;

        handle.stop();
        handle.closed().await;
        info!("Channel {} removed", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use argon2::Params;
    use uuid::Uuid;

    use super::*;
    use crate::user::UserStore;

    #[tokio::test]
    async fn removed_ids_are_not_reused() {
        let registry = ChannelRegistry::new(Arc::new(UserStore::new()), 8);
        let handle = registry.create("general", true, "alice").await;

        registry.remove(0).await.unwrap();
        assert!(handle.is_stopped());
        assert_eq!(registry.lookup(0).await.err(), Some(RegistryError::NotFound(0)));
        assert_eq!(registry.remove(0).await, Err(RegistryError::NotFound(0)));

        assert_eq!(registry.create("again", true, "alice").await.id(), 1);
    }

    #[tokio::test]
    async fn removal_clears_role_mirror_before_returning() {
        let users = Arc::new(UserStore::with_params(
            Params::new(Params::MIN_M_COST, 1, 1, None).unwrap(),
        ));
        users.create("alice", "pw").await.unwrap();
        users.create("bob", "pw").await.unwrap();
        let registry = ChannelRegistry::new(users.clone(), 8);

        let handle = registry.create("general", true, "alice").await;
        let (_role, _events) = handle.subscribe("bob", Uuid::new_v4(), 4).await.unwrap();
        assert!(!users.get("bob").await.unwrap().per_channel_role.is_empty());

        registry.remove(0).await.unwrap();
        for name in ["alice", "bob"] {
            assert!(users.get(name).await.unwrap().per_channel_role.is_empty());
        }
    }
}
