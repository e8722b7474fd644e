//! Process-wide well-known cache locations.
//!
//! The four well-known global caches (user-account, local-machine, secure,
//! in-memory) are modeled here as four independently-configured [`Engine`]
//! instances owned by one container, constructed once and cheaply cloned
//! rather than re-opened per call site, with explicit `init`/`shutdown_all`.

use std::path::PathBuf;
use std::sync::Arc;

use vaultcache_core::Result;
use vaultcache_storage::Cipher;

use crate::engine::{Engine, EngineConfig};

/// Where the four well-known caches live on disk.
#[derive(Debug, Clone)]
pub struct CacheLocationsConfig {
    /// Roams with the user account (synced profile storage, app data, ...).
    pub user_account_path: PathBuf,
    /// Tied to this machine only (local app data, temp, ...).
    pub local_machine_path: PathBuf,
    /// Same storage as `local_machine`, but opened with a cipher.
    pub secure_path: PathBuf,
}

impl CacheLocationsConfig {
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            user_account_path: root.join("user-account.db"),
            local_machine_path: root.join("local-machine.db"),
            secure_path: root.join("secure.db"),
        }
    }
}

/// The four independently-configured engine instances an application
/// exposes as global statics. Cloning is cheap: each field is itself a
/// cheap-to-clone [`Engine`].
#[derive(Clone)]
pub struct CacheLocations {
    pub user_account: Engine,
    pub local_machine: Engine,
    pub secure: Engine,
    pub in_memory: Engine,
}

impl CacheLocations {
    /// Opens all four locations. `secure_cipher` is supplied only to the
    /// `secure` location; the other three use the default no-op cipher.
    pub fn init(config: CacheLocationsConfig, secure_cipher: Arc<dyn Cipher>) -> Result<Self> {
        let user_account = Engine::open(&config.user_account_path, EngineConfig::default())?;
        let local_machine = Engine::open(&config.local_machine_path, EngineConfig::default())?;
        let secure = Engine::open(
            &config.secure_path,
            EngineConfig::default().with_cipher(secure_cipher),
        )?;
        let in_memory = Engine::open_in_memory(EngineConfig::default())?;

        Ok(Self {
            user_account,
            local_machine,
            secure,
            in_memory,
        })
    }

    /// Drains and closes every location. Idempotent per [`Engine::shutdown`].
    pub async fn shutdown_all(&self) -> Result<()> {
        self.user_account.shutdown().await?;
        self.local_machine.shutdown().await?;
        self.secure.shutdown().await?;
        self.in_memory.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultcache_storage::NoopCipher;

    #[tokio::test]
    async fn init_opens_four_independent_engines() {
        let dir = tempfile::tempdir().unwrap();
        let locations =
            CacheLocations::init(CacheLocationsConfig::under(dir.path()), Arc::new(NoopCipher))
                .unwrap();

        locations.user_account.insert("k", vec![1], None).await.unwrap();
        locations.in_memory.insert("k", vec![2], None).await.unwrap();

        assert_eq!(locations.user_account.get("k").await.unwrap(), vec![1]);
        assert_eq!(locations.in_memory.get("k").await.unwrap(), vec![2]);
        assert!(locations.local_machine.get("k").await.is_err());

        locations.shutdown_all().await.unwrap();
    }
}
