//! Client registry used to resolve targets at enqueue time.
//!
//! Producers may address a target by client identifier instead of URL. The
//! registry maps the identifier to the client's current webhook URL exactly
//! once, when the record is created; later registry edits do not affect
//! records already queued.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    models::validate_target_url,
};

/// Resolves client identifiers to delivery URLs.
#[async_trait::async_trait]
pub trait TargetRegistry: Send + Sync + std::fmt::Debug {
    /// Returns the URL for an active client.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::NotFound` for unknown or deactivated clients.
    async fn resolve(&self, client_id: &str) -> Result<String>;
}

/// Registered webhook for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Client identifier.
    pub client_id: String,
    /// Delivery URL.
    pub url: String,
    /// Human-readable name.
    #[serde(default)]
    pub title: Option<String>,
    /// Soft-delete flag. Inactive entries do not resolve.
    #[serde(default = "default_active")]
    pub active: bool,
}

const fn default_active() -> bool {
    true
}

impl RegistryEntry {
    /// Creates an active entry.
    pub fn new(client_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self { client_id: client_id.into(), url: url.into(), title: None, active: true }
    }
}

/// In-memory registry seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl StaticRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry from entries, validating every URL.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if any entry has an unusable URL.
    pub fn from_entries(entries: impl IntoIterator<Item = RegistryEntry>) -> Result<Self> {
        let mut map = HashMap::new();
        for entry in entries {
            validate_target_url(&entry.url)?;
            map.insert(entry.client_id.clone(), entry);
        }
        Ok(Self { entries: RwLock::new(map) })
    }

    /// Adds or replaces an entry.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the URL is unusable.
    pub async fn register(&self, entry: RegistryEntry) -> Result<()> {
        validate_target_url(&entry.url)?;
        self.entries.write().await.insert(entry.client_id.clone(), entry);
        Ok(())
    }

    /// Soft-deletes an entry. Returns false if it was not registered.
    pub async fn deactivate(&self, client_id: &str) -> bool {
        match self.entries.write().await.get_mut(client_id) {
            Some(entry) => {
                entry.active = false;
                true
            },
            None => false,
        }
    }

    /// Snapshot of all entries, active or not.
    pub async fn entries(&self) -> Vec<RegistryEntry> {
        let mut entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        entries.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        entries
    }
}

#[async_trait::async_trait]
impl TargetRegistry for StaticRegistry {
    async fn resolve(&self, client_id: &str) -> Result<String> {
        match self.entries.read().await.get(client_id) {
            Some(entry) if entry.active => Ok(entry.url.clone()),
            Some(_) => Err(CoreError::NotFound(format!("client {client_id} is inactive"))),
            None => Err(CoreError::NotFound(format!("client {client_id}"))),
        }
    }
}
