//! Named-server directory.
//!
//! A [`ServerRegistry`] maps names to running (or stopped) [`Server`]s and
//! remembers one of them as the default.  It owns no transport logic:
//! `crate::infrastructure::launch` builds the server from an address and
//! then registers it here.
//!
//! Most callers hold their own registry.  [`ServerRegistry::global`] offers
//! one process-wide instance for hosts that want a single directory.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, OnceLock};

use netpool_core::StopMode;
use thiserror::Error;
use tracing::{debug, info};

use crate::application::server::Server;
use crate::application::sync::lock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a server named '{0}' is already registered")]
    DuplicateName(String),

    #[error("no server named '{0}' is registered")]
    UnknownServer(String),
}

#[derive(Default)]
struct Directory {
    servers: BTreeMap<String, Arc<Server>>,
    default: Option<String>,
}

/// Thread-safe name → server table with a default entry.
#[derive(Default)]
pub struct ServerRegistry {
    inner: Mutex<Directory>,
}

impl ServerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static ServerRegistry {
        static GLOBAL: OnceLock<ServerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(ServerRegistry::new)
    }

    /// Registers `server` under `name`.  The first server registered becomes
    /// the default.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateName`] if `name` is taken.
    pub fn add_server(&self, name: &str, server: Arc<Server>) -> Result<(), RegistryError> {
        let mut dir = lock(&self.inner);
        if dir.servers.contains_key(name) {
            return Err(RegistryError::DuplicateName(name.to_string()));
        }
        dir.servers.insert(name.to_string(), server);
        if dir.default.is_none() {
            dir.default = Some(name.to_string());
        }
        info!(name = %name, "server registered");
        Ok(())
    }

    /// Unregisters and returns the server called `name`.
    ///
    /// The server is not stopped; dropping the last `Arc` does that.
    pub fn remove_server(&self, name: &str) -> Option<Arc<Server>> {
        let mut dir = lock(&self.inner);
        let removed = dir.servers.remove(name)?;
        if dir.default.as_deref() == Some(name) {
            dir.default = None;
        }
        debug!(name = %name, "server unregistered");
        Some(removed)
    }

    pub fn server(&self, name: &str) -> Option<Arc<Server>> {
        lock(&self.inner).servers.get(name).cloned()
    }

    pub fn default_server(&self) -> Option<Arc<Server>> {
        let dir = lock(&self.inner);
        dir.default
            .as_ref()
            .and_then(|name| dir.servers.get(name))
            .cloned()
    }

    pub fn default_server_name(&self) -> Option<String> {
        lock(&self.inner).default.clone()
    }

    /// Makes `name` the default server.
    ///
    /// # Errors
    ///
    /// [`RegistryError::UnknownServer`] if no server has that name.
    pub fn set_default_server(&self, name: &str) -> Result<(), RegistryError> {
        let mut dir = lock(&self.inner);
        if !dir.servers.contains_key(name) {
            return Err(RegistryError::UnknownServer(name.to_string()));
        }
        dir.default = Some(name.to_string());
        Ok(())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        lock(&self.inner).servers.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the finished-worker sweep on every registered server.
    pub fn reap_finished_workers(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|server| server.reap_finished_workers())
            .sum()
    }

    /// Stops every registered server.  Returns how many were running.
    pub fn stop_all(&self, mode: StopMode) -> usize {
        self.snapshot()
            .iter()
            .filter(|server| server.stop(mode))
            .count()
    }

    /// Unregisters everything and forgets the default.
    pub fn clear(&self) -> Vec<Arc<Server>> {
        let mut dir = lock(&self.inner);
        dir.default = None;
        std::mem::take(&mut dir.servers).into_values().collect()
    }

    // Servers are stopped and swept without the directory lock held.
    fn snapshot(&self) -> Vec<Arc<Server>> {
        lock(&self.inner).servers.values().cloned().collect()
    }
}
