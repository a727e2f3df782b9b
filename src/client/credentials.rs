//! Persistence of the refresh credential between CLI invocations
//!
//! Only the refresh token is stored. Access tokens live in memory inside the
//! session lease and die with the process.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{ForgeError, Result};

/// Storage for long-lived refresh credentials, keyed by client and authority.
pub trait CredentialStore: Send + Sync {
    /// Returns the stored secret for `key`, or `None` when nothing is stored.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Stores `secret` under `key`, replacing any previous value.
    fn save(&self, key: &str, secret: &str) -> Result<()>;

    /// Removes the secret for `key`. Removing a missing entry succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// Builds the store key for a client registered at an authority.
pub fn credential_key(client_id: &str, authority: &str) -> String {
    format!("{}@{}", client_id, authority.trim_end_matches('/'))
}

// ---------------------------------------------------------------------------
// OS keyring
// ---------------------------------------------------------------------------

/// Stores credentials in the platform keyring (macOS Keychain, Secret
/// Service, Windows Credential Manager).
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service: String,
}

impl Default for KeyringCredentialStore {
    fn default() -> Self {
        Self::new("forge-gate")
    }
}

impl KeyringCredentialStore {
    /// Creates a store writing entries under `service`.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, key).map_err(|e| ForgeError::Keyring(e).into())
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ForgeError::Keyring(e).into()),
        }
    }

    fn save(&self, key: &str, secret: &str) -> Result<()> {
        self.entry(key)?
            .set_password(secret)
            .map_err(|e| ForgeError::Keyring(e).into())
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(ForgeError::Keyring(e).into()),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store for tests and headless runs.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| ForgeError::Storage("credential store lock poisoned".to_string()).into())
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn save(&self, key: &str, secret: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), secret.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_key_trims_trailing_slash() {
        assert_eq!(
            credential_key("forge-cli", "https://sso.example.com/realms/forge/"),
            "forge-cli@https://sso.example.com/realms/forge"
        );
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert_eq!(store.load("k").unwrap(), None);

        store.save("k", "refresh-1").unwrap();
        store.save("k", "refresh-2").unwrap();
        assert_eq!(store.load("k").unwrap().as_deref(), Some("refresh-2"));

        store.delete("k").unwrap();
        assert_eq!(store.load("k").unwrap(), None);
    }

    #[test]
    fn test_memory_store_delete_missing_is_ok() {
        let store = MemoryCredentialStore::new();
        assert!(store.delete("never-saved").is_ok());
    }

    #[test]
    fn test_keyring_store_service_name() {
        let store = KeyringCredentialStore::default();
        assert_eq!(store.service, "forge-gate");
    }
}
