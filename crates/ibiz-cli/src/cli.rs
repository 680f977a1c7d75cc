use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ibiz_core::settings::EncryptionKind;
use ibiz_storage::key_material::KeyComponent;

/// CLI surface definition.
#[derive(Parser, Debug)]
#[command(
    name = "ibiz",
    about = "Layered, encrypted product settings",
    version,
    propagate_version = true
)]
pub struct Cli {
    /// Settings file to use instead of the per-user default.
    #[arg(long, global = true)]
    pub settings_file: Option<PathBuf>,
    /// Application-configuration TOML file to use instead of the platform default.
    #[arg(long, global = true)]
    pub app_config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Resolve a setting and print its (decrypted) value.
    Get {
        key: String,
        /// Printed when no tier has a value.
        #[arg(long)]
        default: Option<String>,
        /// How environment and app-config values are encrypted.
        #[arg(long, default_value = "none")]
        encryption: EncryptionKind,
    },
    /// Store a setting in the settings file.
    Set {
        key: String,
        value: String,
        #[arg(long, default_value = "none")]
        encryption: EncryptionKind,
    },
    /// Remove a setting from the settings file.
    Remove { key: String },
    /// List settings-file entries and their encryption (values are not shown).
    List,
    /// Show which tier answers for a setting.
    Where { key: String },
    /// Encrypt a value with the configured key material.
    Encrypt {
        text: String,
        #[arg(long, default_value = "aescbc")]
        encryption: EncryptionKind,
    },
    /// Decrypt a stored value with the configured key material.
    Decrypt {
        value: String,
        #[arg(long, default_value = "aescbc")]
        encryption: EncryptionKind,
    },
    /// Manage cipher key material.
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Run an encrypt/decrypt probe against the configured key material.
    Health,
    /// Report whether the process has administrator rights.
    Elevated,
    /// Print version and exit.
    Version,
    /// Manage CLI configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum KeysCommand {
    /// Replace key material; existing encrypted values become unreadable.
    Rotate {
        /// Only replace this component (key, vector or salt).
        #[arg(long)]
        component: Option<KeyComponent>,
    },
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Create a default config file if one does not exist.
    Init,
}
