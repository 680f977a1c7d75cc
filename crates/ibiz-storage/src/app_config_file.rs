use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use dirs::config_dir;
use ibiz_core::app_config::{AppConfigError, AppConfigStore};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Application configuration kept as a flat TOML table of string values,
/// e.g. `~/.config/ibizproduct/appsettings.toml` (platform-specific).
/// Every `set`/`remove` rewrites the whole file atomically.
#[derive(Debug)]
pub struct TomlAppConfig {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl TomlAppConfig {
    /// Open the store at `path`; a missing or empty file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppConfigError> {
        let path = path.into();
        let values = read_table(&path)?;
        debug!(?path, entries = values.len(), "loaded app config");
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    /// Open the store at [`default_path`].
    pub fn open_default() -> Result<Self, AppConfigError> {
        Self::open(default_path()?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, String>>, AppConfigError> {
        self.values.lock().map_err(|err| AppConfigError::Lock {
            reason: err.to_string(),
        })
    }
}

/// Resolve the default app-config path (platform aware).
pub fn default_path() -> Result<PathBuf, AppConfigError> {
    let base = config_dir().ok_or_else(|| AppConfigError::Io {
        reason: "no config dir available".to_string(),
    })?;
    Ok(base.join("ibizproduct").join("appsettings.toml"))
}

impl AppConfigStore for TomlAppConfig {
    fn get(&self, name: &str) -> Result<Option<String>, AppConfigError> {
        Ok(self.lock()?.get(name).cloned())
    }

    #[instrument(skip(self, value))]
    fn set(&self, name: &str, value: &str) -> Result<(), AppConfigError> {
        let mut values = self.lock()?;
        let previous = values.insert(name.to_string(), value.to_string());
        if let Err(err) = write_table(&self.path, &values) {
            // keep memory in step with the file
            match previous {
                Some(previous) => values.insert(name.to_string(), previous),
                None => values.remove(name),
            };
            return Err(err);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    fn remove(&self, name: &str) -> Result<(), AppConfigError> {
        let mut values = self.lock()?;
        let Some(previous) = values.remove(name) else {
            return Ok(());
        };
        if let Err(err) = write_table(&self.path, &values) {
            values.insert(name.to_string(), previous);
            return Err(err);
        }
        Ok(())
    }
}

fn read_table(path: &Path) -> Result<BTreeMap<String, String>, AppConfigError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let contents = fs::read_to_string(path).map_err(io_err)?;
    if contents.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    toml::from_str(&contents).map_err(|e| AppConfigError::Parse {
        reason: e.to_string(),
    })
}

fn write_table(path: &Path, values: &BTreeMap<String, String>) -> Result<(), AppConfigError> {
    let parent = path.parent().ok_or_else(|| AppConfigError::Io {
        reason: "invalid app config path".to_string(),
    })?;
    fs::create_dir_all(parent).map_err(io_err)?;

    let body = toml::to_string(values).map_err(|e| AppConfigError::Parse {
        reason: e.to_string(),
    })?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(body.as_bytes()).map_err(io_err)?;
    tmp.flush().map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

fn io_err<E: ToString>(err: E) -> AppConfigError {
    AppConfigError::Io {
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TomlAppConfig::open(dir.path().join("appsettings.toml")).expect("open");
        assert_eq!(store.get("ConfigKey").expect("get"), None);
    }

    #[test]
    fn values_persist_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("appsettings.toml");

        let store = TomlAppConfig::open(&path).expect("open");
        store.set("ExternalKey", "ext-123").expect("set");
        store.set("Weird.Name", "a \"quoted\" value").expect("set");
        store.set("Gone", "x").expect("set");
        store.remove("Gone").expect("remove");

        let reopened = TomlAppConfig::open(&path).expect("reopen");
        assert_eq!(
            reopened.get("ExternalKey").expect("get").as_deref(),
            Some("ext-123")
        );
        assert_eq!(
            reopened.get("Weird.Name").expect("get").as_deref(),
            Some("a \"quoted\" value")
        );
        assert_eq!(reopened.get("Gone").expect("get"), None);
    }

    #[test]
    fn unparsable_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("appsettings.toml");
        fs::write(&path, "this is = = not toml").expect("write");

        let err = TomlAppConfig::open(&path).expect_err("parse failure");
        assert!(matches!(err, AppConfigError::Parse { .. }));
    }

    #[test]
    fn provisions_cipher_key_material() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("appsettings.toml");
        let store = TomlAppConfig::open(&path).expect("open");
        let generated = crate::key_material::load_or_generate(&store).expect("generate");

        let reopened = TomlAppConfig::open(&path).expect("reopen");
        let loaded = crate::key_material::load(&reopened).expect("load");
        assert_eq!(loaded, generated);
    }
}
