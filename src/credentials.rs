//! Opaque credential lookup by (source, key).
//!
//! Adapters ask for what they need (`token`, `email`, `base_url`) and never
//! see where it came from.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait CredentialStore: Send + Sync {
    fn get(&self, source: &str, key: &str) -> Option<String>;
    fn set(&self, source: &str, key: &str, value: &str);
    fn delete(&self, source: &str, key: &str);
}

/// Process-local credentials, used by tests and as the overlay of
/// [`EnvCredentialStore`].
#[derive(Default)]
pub struct MemoryCredentialStore {
    values: RwLock<HashMap<(String, String), String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, source: &str, key: &str, value: &str) -> Self {
        self.set(source, key, value);
        self
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self, source: &str, key: &str) -> Option<String> {
        let values = self.values.read().ok()?;
        values.get(&(source.to_string(), key.to_string())).cloned()
    }

    fn set(&self, source: &str, key: &str, value: &str) {
        if let Ok(mut values) = self.values.write() {
            values.insert((source.to_string(), key.to_string()), value.to_string());
        }
    }

    fn delete(&self, source: &str, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(&(source.to_string(), key.to_string()));
        }
    }
}

/// Reads `ROVE_<SOURCE>_<KEY>` from the environment (and `.env`). Values set
/// at runtime shadow the environment; deleting one hides the variable too.
#[derive(Default)]
pub struct EnvCredentialStore {
    overlay: MemoryCredentialStore,
    hidden: RwLock<std::collections::HashSet<String>>,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn var_name(source: &str, key: &str) -> String {
        format!(
            "ROVE_{}_{}",
            source.to_uppercase().replace('-', "_"),
            key.to_uppercase().replace('-', "_")
        )
    }
}

impl CredentialStore for EnvCredentialStore {
    fn get(&self, source: &str, key: &str) -> Option<String> {
        if let Some(value) = self.overlay.get(source, key) {
            return Some(value);
        }
        let name = Self::var_name(source, key);
        if self.hidden.read().ok()?.contains(&name) {
            return None;
        }
        dotenv::var(&name).ok().filter(|v| !v.is_empty())
    }

    fn set(&self, source: &str, key: &str, value: &str) {
        if let Ok(mut hidden) = self.hidden.write() {
            hidden.remove(&Self::var_name(source, key));
        }
        self.overlay.set(source, key, value);
    }

    fn delete(&self, source: &str, key: &str) {
        self.overlay.delete(source, key);
        if let Ok(mut hidden) = self.hidden.write() {
            hidden.insert(Self::var_name(source, key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentialStore::new().with("slack", "token", "xoxb-1");
        assert_eq!(store.get("slack", "token").as_deref(), Some("xoxb-1"));
        assert_eq!(store.get("github", "token"), None);
        store.delete("slack", "token");
        assert_eq!(store.get("slack", "token"), None);
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            EnvCredentialStore::var_name("github", "token"),
            "ROVE_GITHUB_TOKEN"
        );
        assert_eq!(
            EnvCredentialStore::var_name("jira", "base-url"),
            "ROVE_JIRA_BASE_URL"
        );
    }

    #[test]
    fn test_env_store_overlay_and_delete() {
        let store = EnvCredentialStore::new();
        store.set("rove-test-src", "token", "abc");
        assert_eq!(store.get("rove-test-src", "token").as_deref(), Some("abc"));
        store.delete("rove-test-src", "token");
        assert_eq!(store.get("rove-test-src", "token"), None);
    }
}
