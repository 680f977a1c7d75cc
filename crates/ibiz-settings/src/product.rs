use thiserror::Error;

use crate::{error::SettingsError, resolver::SettingsResolver};

pub const EXTERNAL_KEY: &str = "ExternalKey";
pub const PRODUCT_ID: &str = "ProductId";

#[derive(Debug, Error)]
pub enum ProductError {
    #[error(
        "the product external key was not found or is not accessible; set `ExternalKey` in \
         the settings file, the environment or the app config (the panel lists it under the \
         product's external attributes)"
    )]
    ExternalKeyMissing,
    #[error(transparent)]
    Settings(#[from] SettingsError),
}

/// Typed accessors for the settings every product integration needs.
#[derive(Debug, Clone, Copy)]
pub struct ProductSettings<'a> {
    resolver: &'a SettingsResolver,
}

impl<'a> ProductSettings<'a> {
    pub fn new(resolver: &'a SettingsResolver) -> Self {
        Self { resolver }
    }

    /// Key used to authenticate against the hosted API.
    pub fn external_key(&self) -> Result<String, SettingsError> {
        self.resolver.get_setting(EXTERNAL_KEY)
    }

    pub fn product_id(&self) -> Result<i64, SettingsError> {
        self.resolver.get_setting(PRODUCT_ID)
    }

    /// Whether a non-empty external key resolves from any tier.
    pub fn external_key_exists(&self) -> bool {
        self.external_key().is_ok_and(|key| !key.is_empty())
    }

    /// Whether `candidate` matches the configured external key.
    pub fn validate_external_key(&self, candidate: &str) -> bool {
        self.external_key().is_ok_and(|key| key == candidate)
    }

    /// Fail early, with a pointer to where the key is configured, before any
    /// call that needs the external key.
    pub fn verify_external_key(&self) -> Result<String, ProductError> {
        match self.external_key() {
            Ok(key) if !key.is_empty() => Ok(key),
            Ok(_) => Err(ProductError::ExternalKeyMissing),
            Err(err) if err.is_missing() => Err(ProductError::ExternalKeyMissing),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ibiz_core::{app_config::InMemoryAppConfig, env::MapEnv, settings::EncryptionKind};

    use super::*;

    fn resolver(env: MapEnv) -> (tempfile::TempDir, SettingsResolver) {
        let dir = tempfile::tempdir().expect("tempdir");
        let resolver = SettingsResolver::open(
            dir.path().join("settings.json"),
            Arc::new(InMemoryAppConfig::new()),
            Arc::new(env),
        );
        (dir, resolver)
    }

    #[test]
    fn reads_encrypted_external_key_and_product_id() {
        let (_dir, resolver) = resolver(MapEnv::new().with(PRODUCT_ID, "1042"));
        resolver
            .add_setting(EXTERNAL_KEY, "ext-key-abc", EncryptionKind::AesCbc)
            .expect("add");
        let product = ProductSettings::new(&resolver);

        assert_eq!(product.external_key().unwrap(), "ext-key-abc");
        assert_eq!(product.product_id().unwrap(), 1042);
        assert!(product.external_key_exists());
        assert!(product.validate_external_key("ext-key-abc"));
        assert!(!product.validate_external_key("other"));
        assert_eq!(product.verify_external_key().unwrap(), "ext-key-abc");
    }

    #[test]
    fn missing_external_key_is_explained() {
        let (_dir, resolver) = resolver(MapEnv::new());
        let product = ProductSettings::new(&resolver);

        assert!(!product.external_key_exists());
        assert!(!product.validate_external_key(""));
        let err = product.verify_external_key().expect_err("missing");
        assert!(matches!(err, ProductError::ExternalKeyMissing));
        assert!(err.to_string().contains(EXTERNAL_KEY));
    }
}
