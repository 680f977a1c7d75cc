use std::{
    fs, io,
    path::{Path, PathBuf},
};

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use ibiz_core::env::EnvSource;
use serde::{Deserialize, Serialize};

/// Points the CLI at a config file other than the platform default.
pub const CONFIG_PATH_VAR: &str = "IBIZ_CONFIG";

/// Where the `ibiz` binary finds its settings file and app config, and the
/// application name it reports when a setting is missing.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct Config {
    /// Override for the per-user settings file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    /// Override for the application-configuration TOML file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_config: Option<PathBuf>,
    /// Name reported in missing-setting errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
}

impl Config {
    /// Load from `IBIZ_CONFIG` when set, otherwise from the platform config dir.
    pub fn load(env: &dyn EnvSource) -> Result<Self> {
        Self::from_path(locate(env)?)
    }

    /// A missing or blank file yields defaults.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => {
                return Err(err).wrap_err_with(|| format!("reading {}", path.display()));
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config =
            toml::from_str(&contents).wrap_err_with(|| format!("parsing {}", path.display()))?;
        Ok(config.normalized())
    }

    /// Write this config to `path` unless a file is already there. Returns
    /// whether a file was created.
    pub fn write_if_missing(&self, path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(true)
    }

    // Blank entries would otherwise shadow the built-in defaults.
    fn normalized(self) -> Self {
        Self {
            settings_file: self.settings_file.filter(|p| !p.as_os_str().is_empty()),
            app_config: self.app_config.filter(|p| !p.as_os_str().is_empty()),
            application_name: self
                .application_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
        }
    }
}

/// Config file path: `IBIZ_CONFIG`, else `config_dir()/ibizproduct/config.toml`.
pub fn locate(env: &dyn EnvSource) -> Result<PathBuf> {
    if let Some(path) = env.var(CONFIG_PATH_VAR).filter(|p| !p.trim().is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let base = dirs::config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join("ibizproduct").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use ibiz_core::env::MapEnv;

    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = Config::from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn parses_overrides() {
        let contents = r#"
            settings_file = "/tmp/ibiz/ProductSettings.ibpv3"
            app_config = "/tmp/ibiz/appsettings.toml"
            application_name = "Billing Product"
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = Config::from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                settings_file: Some(PathBuf::from("/tmp/ibiz/ProductSettings.ibpv3")),
                app_config: Some(PathBuf::from("/tmp/ibiz/appsettings.toml")),
                application_name: Some("Billing Product".into()),
            }
        );
    }

    #[test]
    fn blank_entries_fall_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "settings_file = \"\"\napplication_name = \"   \"\n").expect("write");

        assert_eq!(Config::from_path(&path).expect("load"), Config::default());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "settings_file = [").expect("write");

        let err = Config::from_path(&path).expect_err("malformed");
        assert!(format!("{err:#}").contains("config.toml"));
    }

    #[test]
    fn environment_overrides_location() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("custom.toml");
        fs::write(&path, "application_name = \"From Env\"\n").expect("write");

        let env = MapEnv::new().with(CONFIG_PATH_VAR, path.to_string_lossy());
        assert_eq!(locate(&env).expect("locate"), path);
        assert_eq!(
            Config::load(&env).expect("load").application_name.as_deref(),
            Some("From Env")
        );
    }

    #[test]
    fn write_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            application_name: Some("first".into()),
            ..Config::default()
        };
        let other = Config {
            application_name: Some("second".into()),
            ..Config::default()
        };

        assert!(cfg.write_if_missing(&path).expect("write should succeed"));
        assert!(!other.write_if_missing(&path).expect("second write ok"));
        assert_eq!(Config::from_path(&path).expect("load"), cfg);
    }
}
