use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use thiserror::Error;

/// Errors produced by application-configuration stores.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppConfigError {
    /// Reading or writing the backing file failed.
    #[error("app config io failure: {reason}")]
    Io { reason: String },
    /// The backing document could not be parsed or serialised.
    #[error("app config parse failure: {reason}")]
    Parse { reason: String },
    /// Internal lock was poisoned by a panicking writer.
    #[error("app config lock poisoned: {reason}")]
    Lock { reason: String },
}

/// Static key/value application configuration. Serves as the last resolution
/// tier for settings and as durable storage for cipher key material.
pub trait AppConfigStore: Send + Sync {
    /// Value stored under `name`, if any.
    fn get(&self, name: &str) -> Result<Option<String>, AppConfigError>;

    /// Persist `value` under `name`, overwriting any existing value.
    fn set(&self, name: &str, value: &str) -> Result<(), AppConfigError>;

    /// Remove `name` (idempotent).
    fn remove(&self, name: &str) -> Result<(), AppConfigError>;
}

impl<T: AppConfigStore + ?Sized> AppConfigStore for Arc<T> {
    fn get(&self, name: &str) -> Result<Option<String>, AppConfigError> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &str) -> Result<(), AppConfigError> {
        (**self).set(name, value)
    }

    fn remove(&self, name: &str) -> Result<(), AppConfigError> {
        (**self).remove(name)
    }
}

/// In-memory application configuration for tests and ephemeral sessions.
/// Clones share the same map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAppConfig {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryAppConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Arc::new(Mutex::new(map)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, AppConfigError> {
        self.inner.lock().map_err(|err| AppConfigError::Lock {
            reason: err.to_string(),
        })
    }
}

impl AppConfigStore for InMemoryAppConfig {
    fn get(&self, name: &str) -> Result<Option<String>, AppConfigError> {
        Ok(self.lock()?.get(name).cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<(), AppConfigError> {
        self.lock()?.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), AppConfigError> {
        self.lock()?.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_remove_round_trip() {
        let store = InMemoryAppConfig::new();
        store.set("ProductId", "7").expect("set");
        assert_eq!(store.get("ProductId").expect("get").as_deref(), Some("7"));

        store.remove("ProductId").expect("remove");
        store.remove("ProductId").expect("remove again");
        assert_eq!(store.get("ProductId").expect("get"), None);
    }

    #[test]
    fn clones_share_state() {
        let store = InMemoryAppConfig::with_values([("a", "1")]);
        let shared: Arc<dyn AppConfigStore> = Arc::new(store.clone());
        shared.set("b", "2").expect("set");

        assert_eq!(store.get("b").expect("get").as_deref(), Some("2"));
        assert_eq!(shared.get("a").expect("get").as_deref(), Some("1"));
    }
}
