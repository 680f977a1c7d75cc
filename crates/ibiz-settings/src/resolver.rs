use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use dirs::home_dir;
use ibiz_core::{
    app_config::AppConfigStore,
    env::{EnvSource, ProcessEnv},
    settings::{EncryptionKind, SettingEntry, SettingsStore},
};
use ibiz_storage::cipher::{CipherError, CipherProvider};
use strum::Display;
use tempfile::NamedTempFile;
use tracing::{debug, instrument, warn};

use crate::{
    convert::FromSetting,
    error::{LookupFailure, SettingsError},
};

pub const SETTINGS_FILE_NAME: &str = "ProductSettings.ibpv3";
pub const DEFAULT_APPLICATION_NAME: &str = "iBizProduct v3";

/// Source that answered a lookup, in resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Tier {
    #[strum(serialize = "settings file")]
    SettingsFile,
    #[strum(serialize = "environment")]
    Environment,
    #[strum(serialize = "app config")]
    AppConfig,
}

/// Raw result of tier resolution, before decryption and conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    pub tier: Tier,
    pub encryption: EncryptionKind,
    pub value: String,
}

/// Resolves named settings from the settings file, the environment and the
/// application configuration, in that order.
///
/// Lookups share a read lock on the in-memory store. Mutations hold the write
/// lock across the insert and the full rewrite of the settings file, so two
/// writers never interleave.
pub struct SettingsResolver {
    path: PathBuf,
    application_name: String,
    store: RwLock<SettingsStore>,
    app_config: Arc<dyn AppConfigStore>,
    env: Arc<dyn EnvSource>,
    cipher: Mutex<Option<Arc<CipherProvider>>>,
}

impl fmt::Debug for SettingsResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsResolver")
            .field("path", &self.path)
            .field("application_name", &self.application_name)
            .field("entries", &self.read_store().len())
            .finish_non_exhaustive()
    }
}

/// `<home>/ProductSettings.ibpv3`.
pub fn default_settings_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(SETTINGS_FILE_NAME))
}

impl SettingsResolver {
    /// Build a resolver over the settings file at `path` and load it. A missing
    /// file is an empty store; an unreadable one is logged and ignored so that
    /// resolution falls through to the environment and app config.
    pub fn open(
        path: impl Into<PathBuf>,
        app_config: Arc<dyn AppConfigStore>,
        env: Arc<dyn EnvSource>,
    ) -> Self {
        let resolver = Self {
            path: path.into(),
            application_name: DEFAULT_APPLICATION_NAME.to_string(),
            store: RwLock::new(SettingsStore::new()),
            app_config,
            env,
            cipher: Mutex::new(None),
        };
        if let Err(err) = resolver.read_settings() {
            debug!(%err, "continuing without settings file");
        }
        resolver
    }

    /// Resolver over the per-user settings file and the process environment.
    pub fn open_default(app_config: Arc<dyn AppConfigStore>) -> Result<Self, SettingsError> {
        let path = default_settings_path().ok_or_else(|| SettingsError::Persistence {
            path: PathBuf::from(SETTINGS_FILE_NAME),
            reason: "no home dir available".to_string(),
        })?;
        Ok(Self::open(path, app_config, Arc::new(ProcessEnv)))
    }

    /// Name used in missing-setting errors.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    pub fn settings_path(&self) -> &Path {
        &self.path
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Find the raw value for `key`. Store entries keep their own encryption
    /// tag; environment and app-config values are tagged `fallback`.
    pub fn lookup(&self, key: &str, fallback: EncryptionKind) -> Result<Lookup, SettingsError> {
        if let Some(entry) = self
            .read_store()
            .get(key)
            .filter(|entry| !entry.value.is_empty())
        {
            return Ok(self.resolved(key, Tier::SettingsFile, entry.encryption, &entry.value));
        }

        if let Some(value) = self.env.var(key).filter(|v| !v.is_empty()) {
            return Ok(self.resolved(key, Tier::Environment, fallback, &value));
        }

        let source = match self.app_config.get(key) {
            Ok(Some(value)) if !value.is_empty() => {
                return Ok(self.resolved(key, Tier::AppConfig, fallback, &value));
            }
            Ok(_) => LookupFailure::NotFound,
            Err(err) => LookupFailure::AppConfig(err),
        };

        Err(SettingsError::Missing {
            key: key.to_string(),
            application: self.application_name.clone(),
            source,
        })
    }

    fn resolved(&self, key: &str, tier: Tier, encryption: EncryptionKind, value: &str) -> Lookup {
        debug!(key, %tier, %encryption, "resolved setting");
        Lookup {
            tier,
            encryption,
            value: value.to_string(),
        }
    }

    /// Resolve `key` and convert it to `T`, treating environment and app-config
    /// values as plaintext.
    pub fn get_setting<T: FromSetting>(&self, key: &str) -> Result<T, SettingsError> {
        self.get_setting_with(key, EncryptionKind::None)
    }

    /// Like [`get_setting`](Self::get_setting), but environment and app-config
    /// values are decrypted as `fallback`.
    pub fn get_setting_with<T: FromSetting>(
        &self,
        key: &str,
        fallback: EncryptionKind,
    ) -> Result<T, SettingsError> {
        let lookup = self.lookup(key, fallback)?;
        let plain = self.reveal(key, &lookup)?;
        T::from_setting(&plain).map_err(|source| SettingsError::Conversion {
            key: key.to_string(),
            source,
        })
    }

    /// Resolve `key`, returning `default` when no tier has a value. Conversion
    /// and decryption failures are still returned.
    pub fn get_setting_or<T: FromSetting>(
        &self,
        key: &str,
        default: T,
    ) -> Result<T, SettingsError> {
        self.get_setting_or_with(key, default, EncryptionKind::None)
    }

    /// [`get_setting_or`](Self::get_setting_or) with environment and app-config
    /// values decrypted as `fallback`.
    pub fn get_setting_or_with<T: FromSetting>(
        &self,
        key: &str,
        default: T,
        fallback: EncryptionKind,
    ) -> Result<T, SettingsError> {
        match self.get_setting_with(key, fallback) {
            Err(err) if err.is_missing() => Ok(default),
            other => other,
        }
    }

    fn reveal(&self, key: &str, lookup: &Lookup) -> Result<String, SettingsError> {
        if !lookup.encryption.is_encrypted() {
            return Ok(lookup.value.clone());
        }
        self.cipher()
            .and_then(|cipher| cipher.decrypt_as(lookup.encryption, &lookup.value))
            .map_err(|source| SettingsError::Cipher {
                key: key.to_string(),
                source,
            })
    }

    /// Store `value` under `key`, encrypting it as `encryption`, and rewrite the
    /// settings file. The in-memory store is updated even if the write fails.
    #[instrument(skip(self, value))]
    pub fn add_setting(
        &self,
        key: &str,
        value: &str,
        encryption: EncryptionKind,
    ) -> Result<(), SettingsError> {
        let stored = if encryption.is_encrypted() && !value.is_empty() {
            self.cipher()
                .and_then(|cipher| cipher.encrypt_as(encryption, value))
                .map_err(|source| SettingsError::Cipher {
                    key: key.to_string(),
                    source,
                })?
        } else {
            value.to_string()
        };

        let mut store = self.write_store();
        if store.is_empty() {
            // do not clobber a file nobody has read yet
            if let Ok(Some(loaded)) = self.load_file() {
                *store = loaded;
            }
        }
        store.insert(key, SettingEntry::new(stored, encryption));
        self.persist(&store)
    }

    /// Remove `key` from the settings file. Returns whether it was present.
    #[instrument(skip(self))]
    pub fn remove_setting(&self, key: &str) -> Result<bool, SettingsError> {
        let mut store = self.write_store();
        if store.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&store)?;
        Ok(true)
    }

    /// Names and encryption tags of the settings-file entries. Values are
    /// never exposed here.
    pub fn keys(&self) -> Vec<(String, EncryptionKind)> {
        self.read_store()
            .iter()
            .map(|(key, entry)| (key.to_string(), entry.encryption))
            .collect()
    }

    /// Replace the in-memory store with the settings file, if it exists. On a
    /// read or parse failure the store is left as it was.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read_settings(&self) -> Result<(), SettingsError> {
        if let Some(loaded) = self.load_file()? {
            *self.write_store() = loaded;
        }
        Ok(())
    }

    /// Rewrite the settings file from the in-memory store.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn write_settings(&self) -> Result<(), SettingsError> {
        let store = self.write_store();
        self.persist(&store)
    }

    fn load_file(&self) -> Result<Option<SettingsStore>, SettingsError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let loaded = fs::read_to_string(&self.path)
            .map_err(|e| self.persistence_err(e))
            .and_then(|json| SettingsStore::from_json(&json).map_err(|e| self.persistence_err(e)));
        match loaded {
            Ok(store) => {
                debug!(entries = store.len(), "loaded settings file");
                Ok(Some(store))
            }
            Err(err) => {
                warn!(%err, "unable to read settings file");
                Err(err)
            }
        }
    }

    fn persist(&self, store: &SettingsStore) -> Result<(), SettingsError> {
        let result = write_atomic(&self.path, store).map_err(|e| self.persistence_err(e));
        if let Err(err) = &result {
            warn!(%err, "unable to write settings file");
        }
        result
    }

    fn persistence_err<E: ToString>(&self, err: E) -> SettingsError {
        SettingsError::Persistence {
            path: self.path.clone(),
            reason: err.to_string(),
        }
    }

    fn cipher(&self) -> Result<Arc<CipherProvider>, CipherError> {
        let mut slot = self.cipher.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(cipher) = slot.as_ref() {
            return Ok(Arc::clone(cipher));
        }
        let cipher = Arc::new(CipherProvider::from_store(self.app_config.as_ref())?);
        *slot = Some(Arc::clone(&cipher));
        Ok(cipher)
    }

    // Store mutations are single inserts/removes, so a poisoned lock still
    // guards a consistent map.
    fn read_store(&self) -> RwLockReadGuard<'_, SettingsStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_store(&self) -> RwLockWriteGuard<'_, SettingsStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn write_atomic(path: &Path, store: &SettingsStore) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let json = store.to_json().map_err(std::io::Error::other)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(json.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
