use crate::error::Result;
use std::{
    path::{Path, PathBuf},
    sync::Mutex,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentInfo {
    pub name: String,
    pub id: String,
    pub public_key: String,
}

impl Default for ComponentInfo {
    fn default() -> Self {
        Self {
            name: "Pool Miner".into(),
            id: String::new(),
            public_key: String::new(),
        }
    }
}

pub type RegisteredCallback = Box<dyn Fn() + Send + Sync>;
pub type ReadyCallback = Box<dyn Fn(&Path) + Send + Sync>;

/// The host's component updater.
pub trait ComponentRegistry: Send + Sync {
    /// Registers a component. `on_registered` fires once registration is
    /// accepted; `on_ready` fires with the install directory whenever a
    /// version is installed.
    fn register(
        &self,
        name: &str,
        public_key: &str,
        on_registered: RegisteredCallback,
        on_ready: ReadyCallback,
    ) -> Result<()>;

    fn request_update(&self, id: &str);
}

/// Registry for a component that is already unpacked in a local directory.
/// Both callbacks fire synchronously inside `register`.
#[derive(Debug)]
pub struct InstallDirRegistry {
    install_dir: PathBuf,
    updates: Mutex<Vec<String>>,
}

impl InstallDirRegistry {
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            updates: Mutex::new(Vec::new()),
        }
    }

    /// Ids passed to `request_update` so far.
    pub fn requested_updates(&self) -> Vec<String> {
        self.updates
            .lock()
            .map(|updates| updates.clone())
            .unwrap_or_default()
    }
}

impl ComponentRegistry for InstallDirRegistry {
    fn register(
        &self,
        name: &str,
        _public_key: &str,
        on_registered: RegisteredCallback,
        on_ready: ReadyCallback,
    ) -> Result<()> {
        tracing::info!(component = name, dir = %self.install_dir.display(), "registered");
        on_registered();
        on_ready(&self.install_dir);
        Ok(())
    }

    fn request_update(&self, id: &str) {
        tracing::debug!(id, "update requested");
        if let Ok(mut updates) = self.updates.lock() {
            updates.push(id.to_string());
        }
    }
}
