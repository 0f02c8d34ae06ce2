//! Resolution of configured targets to their durable identifiers.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::config::TargetConfig;
use crate::database::Storage;
use crate::database::models::TargetId;
use crate::monitoring::types::Target;

pub struct TargetRegistry {
    storage: Arc<dyn Storage>,
}

impl TargetRegistry {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Idempotent upsert keyed by address, a changed alias is updated in place
    pub async fn ensure_target(&self, address: &str, alias: &str) -> Result<TargetId> {
        self.storage
            .ensure_target(address, alias)
            .await
            .with_context(|| format!("Failed to register target {alias} ({address})"))
    }

    /// Resolve every configured target, in configured order.
    ///
    /// Stops at the first failure: results of a target without an id could
    /// not be attributed to anything.
    pub async fn resolve_all(&self, configs: &[TargetConfig]) -> Result<Vec<Target>> {
        let mut targets = Vec::with_capacity(configs.len());
        for config in configs {
            let id = self.ensure_target(&config.address, &config.alias).await?;
            info!("Registered target {} ({}) as {}", config.alias, config.address, id);
            targets.push(Target::new(id, config.address.clone(), config.alias.clone()));
        }
        Ok(targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryStorage;
    use crate::database::repository::tests::create_test_storage;

    fn configs() -> Vec<TargetConfig> {
        vec![
            TargetConfig { address: "192.168.1.1".into(), alias: "router".into() },
            TargetConfig { address: "8.8.8.8".into(), alias: "internet".into() },
        ]
    }

    #[tokio::test]
    async fn test_resolve_all_keeps_order() -> Result<()> {
        let registry = TargetRegistry::new(Arc::new(MemoryStorage::default()));

        let targets = registry.resolve_all(&configs()).await?;

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].alias, "router");
        assert_eq!(targets[1].address, "8.8.8.8");
        assert_ne!(targets[0].id, targets[1].id);
        assert_eq!(targets[0].counters.total(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_alias_change_keeps_id() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = Arc::new(create_test_storage(&dir).await?);
        let registry = TargetRegistry::new(storage.clone());

        let first = registry.ensure_target("8.8.8.8", "internet").await?;
        let second = registry.ensure_target("8.8.8.8", "google-dns").await?;

        assert_eq!(first, second);
        let row = storage.get_target(second).await?.expect("target exists");
        assert_eq!(row.alias, "google-dns");
        Ok(())
    }

    #[tokio::test]
    async fn test_resolve_all_is_stable_across_restarts() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let before: Vec<TargetId> = {
            let storage = Arc::new(create_test_storage(&dir).await?);
            TargetRegistry::new(storage).resolve_all(&configs()).await?.iter().map(|t| t.id).collect()
        };
        let storage = Arc::new(create_test_storage(&dir).await?);
        let after: Vec<TargetId> =
            TargetRegistry::new(storage).resolve_all(&configs()).await?.iter().map(|t| t.id).collect();

        assert_eq!(before, after);
        Ok(())
    }

    #[tokio::test]
    async fn test_unreachable_storage_is_fatal() {
        let registry = TargetRegistry::new(Arc::new(MemoryStorage::unreachable()));

        let err = registry.resolve_all(&configs()).await.unwrap_err();

        assert!(format!("{err:#}").contains("router (192.168.1.1)"));
    }
}
