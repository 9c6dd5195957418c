//! Provider credential storage.

use std::sync::RwLock;

/// OpenWeather keys are 32 hex characters.
const EXPECTED_KEY_LEN: usize = 32;

/// Key-value store returning the optional provider API key.
pub trait CredentialStore: Send + Sync {
    fn api_key(&self) -> Option<String>;
    fn set_api_key(&self, key: Option<String>);
}

/// Process-local credential store.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    key: RwLock<Option<String>>,
}

impl InMemoryCredentialStore {
    pub fn new(key: Option<String>) -> Self {
        let store = Self::default();
        store.set_api_key(key);
        store
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn api_key(&self) -> Option<String> {
        match self.key.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Blank keys clear the stored key.
    fn set_api_key(&self, key: Option<String>) {
        let key = key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        if let Some(k) = &key {
            if k.len() != EXPECTED_KEY_LEN {
                tracing::warn!(
                    "API key has {} characters, expected {}",
                    k.len(),
                    EXPECTED_KEY_LEN
                );
            }
        }
        match self.key.write() {
            Ok(mut guard) => *guard = key,
            Err(poisoned) => *poisoned.into_inner() = key,
        }
    }
}
