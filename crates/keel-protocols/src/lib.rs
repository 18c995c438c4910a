//! # keel Protocols
//!
//! Interface definitions shared by every keel crate. Contains only the
//! contracts a system type implements and the errors the kernel reports;
//! the machinery that drives them lives in `keel-core` and `keel-events`.
//!
//! ## Core Traits
//!
//! - [`System`] - Base trait for every managed system
//! - [`InitializeAsync`], [`EditorSupport`], [`RegisterHooks`] - Startup capabilities
//! - [`Update`], [`LateUpdate`], [`FixedUpdate`] - Per-tick capabilities
//! - [`Toggle`], [`PauseAware`], [`FocusAware`], [`QuitAware`] - Runtime capabilities
//! - [`Inject`] / [`Dependencies`] / [`Injectable`] - Explicit dependency injection

pub mod error;
pub mod system;

pub use error::{AliasConflict, KernelError, MissingEdge, SystemError};
pub use system::{
    Capabilities, Capability, Dependencies, DependencyLookup, EditorSupport, EnabledFlag,
    FixedUpdate, FocusAware, InitializeAsync, Inject, Injectable, InjectionRecord, LateUpdate,
    LifecycleState, PauseAware, QuitAware, RegisterHooks, System, SystemKey, Toggle, Update,
};
