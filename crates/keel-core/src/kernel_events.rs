//! Notifications the kernel publishes on its own bus.

use serde::Serialize;

/// A system finished registering and initializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemRegistered {
    pub name: String,
    pub alias: Option<String>,
}

/// A system was unregistered at runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemUnregistered {
    pub name: String,
}

/// A system's enabled flag changed value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemEnabledChanged {
    pub name: String,
    pub enabled: bool,
}

/// Startup finished. Published once per start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KernelInitialized {
    pub active: Vec<String>,
    pub failed: Vec<String>,
}
