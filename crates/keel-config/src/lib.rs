//! # Keel Config
//!
//! TOML configuration for the keel host and kernel.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{
    ConfigValidator, MIN_TICK_RATE, ValidationError, ValidationResult, ValidationWarning,
};
