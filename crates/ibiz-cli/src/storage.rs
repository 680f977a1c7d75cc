use std::{path::PathBuf, sync::Arc};

use color_eyre::Result;
use ibiz_core::{app_config::AppConfigStore, env::ProcessEnv};
use ibiz_settings::{resolver::default_settings_path, SettingsResolver};
use ibiz_storage::app_config_file::{self, TomlAppConfig};
use tracing::debug;

use crate::{cli::Cli, config::Config};

/// Paths after applying command-line flags over config-file overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub settings_file: PathBuf,
    pub app_config: PathBuf,
}

pub fn resolve_paths(cli: &Cli, config: &Config) -> Result<Paths> {
    let settings_file = match cli.settings_file.as_ref().or(config.settings_file.as_ref()) {
        Some(path) => path.clone(),
        None => default_settings_path()
            .ok_or_else(|| color_eyre::eyre::eyre!("no home dir available"))?,
    };
    let app_config = match cli.app_config.as_ref().or(config.app_config.as_ref()) {
        Some(path) => path.clone(),
        None => app_config_file::default_path()?,
    };
    Ok(Paths {
        settings_file,
        app_config,
    })
}

pub fn open_app_config(paths: &Paths) -> Result<Arc<dyn AppConfigStore>> {
    debug!(path = ?paths.app_config, "opening app config");
    Ok(Arc::new(TomlAppConfig::open(&paths.app_config)?))
}

/// Build a resolver over the process environment.
pub fn open_resolver(
    paths: &Paths,
    app_config: Arc<dyn AppConfigStore>,
    config: &Config,
) -> SettingsResolver {
    debug!(path = ?paths.settings_file, "opening settings file");
    let resolver = SettingsResolver::open(&paths.settings_file, app_config, Arc::new(ProcessEnv));
    match &config.application_name {
        Some(name) => resolver.with_application_name(name.clone()),
        None => resolver,
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn flags_override_config_file() {
        let cli = Cli::try_parse_from(["ibiz", "list", "--settings-file", "/flag/settings.json"])
            .expect("parse");
        let config = Config {
            settings_file: Some(PathBuf::from("/config/settings.json")),
            app_config: Some(PathBuf::from("/config/app.toml")),
            application_name: None,
        };

        let paths = resolve_paths(&cli, &config).expect("paths");
        assert_eq!(paths.settings_file, PathBuf::from("/flag/settings.json"));
        assert_eq!(paths.app_config, PathBuf::from("/config/app.toml"));
    }

    #[test]
    fn resolver_uses_configured_application_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = Paths {
            settings_file: dir.path().join("settings.json"),
            app_config: dir.path().join("app.toml"),
        };
        let config = Config {
            application_name: Some("Billing Product".into()),
            ..Config::default()
        };
        let app_config = open_app_config(&paths).expect("app config");
        let resolver = open_resolver(&paths, app_config, &config);

        assert_eq!(resolver.application_name(), "Billing Product");
        assert_eq!(resolver.settings_path(), paths.settings_file.as_path());
    }
}
