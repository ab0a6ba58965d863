//! Tenant registry.
//!
//! Lazily starts one coordinator per tenant key, each backed by its own
//! SQLite file under `[db].dir`, and hands out clones of its handle.
//!
//! The map lock is only held to find a tenant's cell. Opening the database
//! happens inside that tenant's `OnceCell`, so a slow open never delays
//! requests for other tenants.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OnceCell};

use gitvault_core::{VaultError, VaultResult};

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle, CoordinatorSettings};
use crate::remote::ContentStoreFactory;
use crate::sqlite_store::SqliteIndexStore;
use crate::token_cache::TokenCache;

/// Tenant keys become file names, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_tenant(tenant: &str) -> VaultResult<()> {
    if tenant.is_empty() || tenant.len() > 128 {
        return Err(VaultError::Validation(
            "tenant must be 1-128 characters".to_string(),
        ));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(VaultError::Validation(format!(
            "invalid tenant '{}': use letters, digits, '-' or '_'",
            tenant
        )));
    }
    Ok(())
}

pub struct TenantRegistry {
    config: Config,
    remote: Arc<dyn ContentStoreFactory>,
    tokens: Arc<TokenCache>,
    handles: Mutex<HashMap<String, Arc<OnceCell<CoordinatorHandle>>>>,
}

impl TenantRegistry {
    pub fn new(config: Config, remote: Arc<dyn ContentStoreFactory>) -> Self {
        Self {
            config,
            remote,
            tokens: Arc::new(TokenCache::new()),
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Handle for `tenant`, starting its coordinator on first use.
    pub async fn get(&self, tenant: &str) -> VaultResult<CoordinatorHandle> {
        validate_tenant(tenant)?;
        let cell = self
            .handles
            .lock()
            .await
            .entry(tenant.to_string())
            .or_default()
            .clone();
        let handle = cell.get_or_try_init(|| self.open(tenant)).await?;
        Ok(handle.clone())
    }

    async fn open(&self, tenant: &str) -> VaultResult<CoordinatorHandle> {
        let path = self.config.tenant_db_path(tenant);
        let store = SqliteIndexStore::open(&path, self.config.limits.store_limits()).await?;
        let handle = Coordinator::start(
            CoordinatorSettings::from_config(tenant, &self.config),
            Arc::new(store),
            self.remote.clone(),
            self.tokens.clone(),
        )
        .await?;
        tracing::info!(tenant, db = %path.display(), "tenant opened");
        Ok(handle)
    }

    /// Tenants opened so far, sorted.
    pub async fn open_tenants(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handles
            .lock()
            .await
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::MemoryRemote;
    use std::time::Duration;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> TenantRegistry {
        let mut config = Config::minimal();
        config.db.dir = dir.path().to_path_buf();
        TenantRegistry::new(config, Arc::new(MemoryRemote::new()))
    }

    #[test]
    fn test_validate_tenant() {
        assert!(validate_tenant("acme-1_b").is_ok());
        assert!(validate_tenant("").is_err());
        assert!(validate_tenant("../etc").is_err());
        assert!(validate_tenant("a b").is_err());
    }

    #[tokio::test]
    async fn test_registry_reuses_handles() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);

        let a = registry.get("alpha").await.unwrap();
        let again = registry.get("alpha").await.unwrap();
        registry.get("beta").await.unwrap();
        assert_eq!(a.tenant(), again.tenant());
        assert_eq!(registry.open_tenants().await, vec!["alpha", "beta"]);
        assert!(dir.path().join("alpha.sqlite").exists());

        let status = a.index_status().await.unwrap();
        assert!(status.state.initialized);
        assert_eq!(status.state.file_index_in_folder, -1);
    }

    #[tokio::test]
    async fn test_opening_one_tenant_does_not_block_another() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(registry(&dir));
        let cell = registry
            .handles
            .lock()
            .await
            .entry("slow".to_string())
            .or_default()
            .clone();

        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let opener = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let opened = cell
                    .get_or_try_init(move || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        registry.open("slow").await
                    })
                    .await
                    .map(|h| h.tenant().to_string());
                opened
            })
        };
        started_rx.await.unwrap();

        let beta = tokio::time::timeout(Duration::from_secs(5), registry.get("beta"))
            .await
            .expect("beta waited on another tenant's open")
            .unwrap();
        assert_eq!(beta.tenant(), "beta");
        assert_eq!(registry.open_tenants().await, vec!["beta"]);

        release_tx.send(()).unwrap();
        assert_eq!(opener.await.unwrap().unwrap(), "slow");
        assert_eq!(registry.open_tenants().await, vec!["beta", "slow"]);
    }

    #[tokio::test]
    async fn test_failed_open_can_be_retried() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let blocker = dir.path().join("gamma.sqlite");
        std::fs::create_dir_all(&blocker).unwrap();

        assert!(registry.get("gamma").await.is_err());
        assert!(registry.open_tenants().await.is_empty());

        std::fs::remove_dir(&blocker).unwrap();
        let handle = registry.get("gamma").await.unwrap();
        assert_eq!(handle.tenant(), "gamma");
        assert_eq!(registry.open_tenants().await, vec!["gamma"]);
    }
}
