use std::collections::HashMap;
use std::sync::RwLock;

use keyring::Entry;

use crate::api::ApiError;

/// Store key under which the refresh token is persisted.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Scoped key-value store for long-lived credentials.
///
/// The session core only ever calls these three operations, and only with
/// [`REFRESH_TOKEN_KEY`].
pub trait CredentialStore: Send + Sync {
    /// Read a value, `Ok(None)` when nothing is stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>, ApiError>;

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError>;

    /// Remove a value. Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<(), ApiError>;
}

/// Credential store backed by the OS keychain.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, ApiError> {
        Entry::new(&self.service, key)
            .map_err(|e| ApiError::Credential(format!("Failed to create keyring entry: {}", e)))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ApiError::Credential(format!(
                "Failed to retrieve credential from keychain: {}",
                e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        self.entry(key)?.set_password(value).map_err(|e| {
            ApiError::Credential(format!("Failed to store credential in keychain: {}", e))
        })
    }

    fn delete(&self, key: &str) -> Result<(), ApiError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ApiError::Credential(format!(
                "Failed to delete credential from keychain: {}",
                e
            ))),
        }
    }
}

/// Process-local credential store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a refresh token, as if a previous run had logged in.
    pub fn with_refresh_token(token: &str) -> Self {
        let store = Self::new();
        store
            .values
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(REFRESH_TOKEN_KEY.to_string(), token.to_string());
        store
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, ApiError> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ApiError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), ApiError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.remove(key);
        Ok(())
    }
}
