mod cli;
mod commands;
mod config;
mod storage;

use clap::Parser;
use color_eyre::Result;
use ibiz_core::env::ProcessEnv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::cli::{Command, ConfigCommand, KeysCommand};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::Config::load(&ProcessEnv)?;

    match &cli.command {
        Command::Version => {
            print_version();
            return Ok(());
        }
        Command::Elevated => {
            commands::elevated();
            return Ok(());
        }
        Command::Config(ConfigCommand::Init) => return init_config(&config),
        _ => {}
    }

    let paths = storage::resolve_paths(&cli, &config)?;
    let app_config = storage::open_app_config(&paths)?;

    match cli.command {
        Command::Get {
            key,
            default,
            encryption,
        } => {
            let resolver = storage::open_resolver(&paths, app_config, &config);
            commands::get(&resolver, &key, default, encryption)?
        }
        Command::Set {
            key,
            value,
            encryption,
        } => {
            let resolver = storage::open_resolver(&paths, app_config, &config);
            commands::set(&resolver, &key, &value, encryption)?
        }
        Command::Remove { key } => {
            let resolver = storage::open_resolver(&paths, app_config, &config);
            commands::remove(&resolver, &key)?
        }
        Command::List => {
            let resolver = storage::open_resolver(&paths, app_config, &config);
            commands::list(&resolver)?
        }
        Command::Where { key } => {
            let resolver = storage::open_resolver(&paths, app_config, &config);
            commands::locate(&resolver, &key)?
        }
        Command::Encrypt { text, encryption } => {
            commands::encrypt(app_config.as_ref(), &text, encryption)?
        }
        Command::Decrypt { value, encryption } => {
            commands::decrypt(app_config.as_ref(), &value, encryption)?
        }
        Command::Keys(KeysCommand::Rotate { component }) => {
            commands::rotate_keys(app_config.as_ref(), component)?
        }
        Command::Health => commands::health(app_config.as_ref())?,
        Command::Version | Command::Elevated | Command::Config(_) => {}
    }

    Ok(())
}

fn init_tracing() {
    // Respect user-provided filters, default to info to avoid noisy stdout.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("ibiz {}", env!("CARGO_PKG_VERSION"));
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::locate(&ProcessEnv)?;
    if config.write_if_missing(&path)? {
        println!("Config initialized at {}", path.display());
    } else {
        println!("Config already present at {}", path.display());
    }
    Ok(())
}
