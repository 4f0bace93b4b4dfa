use keyring::Entry;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{MoePeekError, Result};

/// Key under which the remote backend's API key is stored.
pub const OPENAI_API_KEY: &str = "openai_api_key";

/// Service name used for keyring entries.
pub const KEYRING_SERVICE: &str = "moepeek";

/// Synchronous present-or-absent lookup of secrets.
///
/// An empty stored value counts as absent.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    fn load(&self, key: &str) -> Option<String>;
}

/// Platform keyring, with an environment variable override per key.
///
/// The override for `openai_api_key` is `OPENAI_API_KEY`.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn env_var_name(key: &str) -> String {
        key.to_uppercase()
    }

    pub fn save(&self, key: &str, value: &str) -> Result<()> {
        let entry = self.entry(key)?;
        entry
            .set_password(value)
            .map_err(|e| MoePeekError::Credential(format!("Failed to save {} to keyring: {}", key, e)))?;
        debug!("Stored {} in keyring", key);
        Ok(())
    }

    /// Remove a stored secret. Deleting a missing entry is not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        let entry = self.entry(key)?;
        match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(MoePeekError::Credential(format!(
                "Failed to delete {} from keyring: {}",
                key, e
            ))),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| MoePeekError::Credential(format!("Keyring init error: {}", e)))
    }
}

impl Default for KeyringStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for KeyringStore {
    fn load(&self, key: &str) -> Option<String> {
        if let Ok(value) = std::env::var(Self::env_var_name(key)) {
            if !value.trim().is_empty() {
                return Some(value);
            }
        }

        let entry = match self.entry(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("{}", e);
                return None;
            }
        };

        match entry.get_password() {
            Ok(value) if !value.is_empty() => Some(value),
            Ok(_) | Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!("Keyring error for {}: {}", key, e);
                None
            }
        }
    }
}

/// In-process store, for embedding hosts that manage secrets themselves.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.into(), value.into());
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl CredentialStore for MemoryStore {
    fn load(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .ok()?
            .get(key)
            .filter(|value| !value.is_empty())
            .cloned()
    }
}
