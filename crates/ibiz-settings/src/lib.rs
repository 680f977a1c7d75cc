//! Layered settings resolution: the per-user settings file first, then the
//! process environment, then the application configuration. Values stored
//! encrypted are decrypted transparently before typed conversion.

pub mod convert;
pub mod error;
pub mod privilege;
pub mod product;
pub mod resolver;

pub use convert::FromSetting;
pub use error::SettingsError;
pub use resolver::{Lookup, SettingsResolver, Tier};
