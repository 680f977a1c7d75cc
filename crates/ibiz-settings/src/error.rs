use std::path::PathBuf;

use ibiz_core::app_config::AppConfigError;
use ibiz_storage::cipher::CipherError;
use thiserror::Error;

use crate::convert::ConversionError;

/// Why the last resolution tier produced nothing.
#[derive(Debug, Error)]
pub enum LookupFailure {
    #[error("not set in the settings file, the environment or the app config")]
    NotFound,
    #[error(transparent)]
    AppConfig(#[from] AppConfigError),
}

#[derive(Debug, Error)]
pub enum SettingsError {
    /// No tier produced a value and no default was given.
    #[error("there is currently no definition that {application} can use for: {key}")]
    Missing {
        key: String,
        application: String,
        #[source]
        source: LookupFailure,
    },
    /// A value was found but does not parse as the requested type.
    #[error("setting `{key}` could not be converted: {source}")]
    Conversion {
        key: String,
        #[source]
        source: ConversionError,
    },
    /// Reading or writing the settings file failed.
    #[error("settings file {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
    /// Encrypting or decrypting a value failed.
    #[error("setting `{key}`: {source}")]
    Cipher {
        key: String,
        #[source]
        source: CipherError,
    },
}

impl SettingsError {
    pub fn is_missing(&self) -> bool {
        matches!(self, SettingsError::Missing { .. })
    }
}
