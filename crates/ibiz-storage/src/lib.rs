//! Concrete storage for product settings: the value cipher, its key material,
//! and a file-backed application-configuration store.
//! Key material lives in the application configuration (`ConfigKey`,
//! `ConfigVector`, `ConfigSalt`) and is generated once on first use.

pub mod app_config_file;
pub mod cipher;
pub mod key_material;
