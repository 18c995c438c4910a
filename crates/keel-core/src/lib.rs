//! # Keel Core
//!
//! System management for the keel kernel.
//!
//! ## Components
//!
//! - [`Catalog`] - Descriptors declared before any instance exists
//! - [`resolve`] - Deterministic initialization order from the catalog
//! - [`inject`](injector::inject) - Binds dependencies into new instances
//! - [`Registry`] - Live instances by type and alias
//! - [`Dispatcher`] - Startup sequencing and tick dispatch
//! - [`Kernel`] - Facade wiring all of the above to an [`EventBus`]

pub mod catalog;
pub mod descriptor;
pub mod dispatcher;
pub mod injector;
pub mod kernel;
pub mod kernel_events;
pub mod registry;
pub mod resolver;

pub use catalog::{Catalog, Discovery, DiscoveryOptions, SkipReason, SkippedSystem};
pub use descriptor::{Constructed, Contract, SystemDescriptor};
pub use dispatcher::{
    BringUp, Dispatcher, DispatcherOptions, FailedSystem, STATS_WINDOW, Slot, StartupReport,
    UpdateStats,
};
pub use kernel::{DependencyNode, Kernel, KernelBuilder, KernelState, SystemStatus};
pub use kernel_events::{
    KernelInitialized, SystemEnabledChanged, SystemRegistered, SystemUnregistered,
};
pub use registry::{Registry, SystemEntry, SystemId};
pub use resolver::{Resolution, resolve};

pub use keel_events::EventBus;
