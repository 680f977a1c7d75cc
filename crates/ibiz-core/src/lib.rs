//! Core contracts for product settings: the settings-file data model and the
//! lookup sources (application configuration, environment) the resolver consults.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod app_config;
pub mod env;
pub mod settings;
