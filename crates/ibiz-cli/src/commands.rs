use color_eyre::Result;
use ibiz_core::{app_config::AppConfigStore, settings::EncryptionKind};
use ibiz_settings::{error::SettingsError, privilege::is_elevated, SettingsResolver};
use ibiz_storage::{
    cipher::CipherProvider,
    key_material::{self, KeyComponent},
};
use strum::IntoEnumIterator;
use tracing::info;

/// Print the resolved value of `key`, or `default` when nothing is set.
pub fn get(
    resolver: &SettingsResolver,
    key: &str,
    default: Option<String>,
    encryption: EncryptionKind,
) -> Result<()> {
    let value = match default {
        Some(default) => resolver.get_setting_or_with::<String>(key, default, encryption)?,
        None => resolver.get_setting_with::<String>(key, encryption)?,
    };
    println!("{value}");
    Ok(())
}

pub fn set(
    resolver: &SettingsResolver,
    key: &str,
    value: &str,
    encryption: EncryptionKind,
) -> Result<()> {
    resolver.add_setting(key, value, encryption)?;
    println!(
        "Stored {key} ({encryption}) in {}",
        resolver.settings_path().display()
    );
    Ok(())
}

pub fn remove(resolver: &SettingsResolver, key: &str) -> Result<()> {
    if resolver.remove_setting(key)? {
        println!("Removed {key}");
    } else {
        println!("{key} is not in the settings file");
    }
    Ok(())
}

pub fn list(resolver: &SettingsResolver) -> Result<()> {
    let keys = resolver.keys();
    if keys.is_empty() {
        println!(
            "No settings yet. Add one with `ibiz set <key> <value>` ({}).",
            resolver.settings_path().display()
        );
        return Ok(());
    }
    for (key, encryption) in keys {
        println!("{key} [{encryption}]");
    }
    Ok(())
}

pub fn locate(resolver: &SettingsResolver, key: &str) -> Result<()> {
    match resolver.lookup(key, EncryptionKind::None) {
        Ok(lookup) => println!("{key}: {} ({})", lookup.tier, lookup.encryption),
        Err(SettingsError::Missing { .. }) => println!("{key}: not set"),
        Err(err) => return Err(err.into()),
    }
    Ok(())
}

pub fn encrypt(app_config: &dyn AppConfigStore, text: &str, kind: EncryptionKind) -> Result<()> {
    let cipher = CipherProvider::from_store(app_config)?;
    println!("{}", cipher.encrypt_as(kind, text)?);
    Ok(())
}

pub fn decrypt(app_config: &dyn AppConfigStore, value: &str, kind: EncryptionKind) -> Result<()> {
    let cipher = CipherProvider::from_store(app_config)?;
    println!("{}", cipher.decrypt_as(kind, value)?);
    Ok(())
}

pub fn rotate_keys(app_config: &dyn AppConfigStore, component: Option<KeyComponent>) -> Result<()> {
    let material = key_material::regenerate(app_config, component)?;
    info!(salt_len = material.salt_len(), "key material rotated");
    match component {
        Some(component) => println!("Regenerated {}", component.config_name()),
        None => println!("Regenerated all key material"),
    }
    println!("Values encrypted under the previous material can no longer be decrypted.");
    Ok(())
}

/// Round-trips a probe through every encryption kind.
pub fn health(app_config: &dyn AppConfigStore) -> Result<()> {
    let cipher = CipherProvider::from_store(app_config)?;
    probe(&cipher)?;
    println!("Cipher: ok");
    Ok(())
}

fn probe(cipher: &CipherProvider) -> Result<()> {
    let payload = "ok";
    for kind in EncryptionKind::iter() {
        let stored = cipher.encrypt_as(kind, payload)?;
        if cipher.decrypt_as(kind, &stored)? != payload {
            color_eyre::eyre::bail!("{kind} round-trip failed");
        }
    }
    Ok(())
}

pub fn elevated() {
    println!("{}", if is_elevated() { "elevated" } else { "not elevated" });
}
