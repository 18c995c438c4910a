//! System and capability trait definitions.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::Dependencies;
use crate::error::SystemError;

/// Core trait for every system managed by the kernel.
///
/// Implementing only this trait is legal: such a system exists to be looked
/// up and injected elsewhere. Each optional behaviour is a separate
/// capability trait; a system opts in by implementing the trait and
/// returning `Some(self)` from the matching accessor. The dispatcher queries
/// the accessors once at registration and never calls a slot the system did
/// not declare.
///
/// All callbacks take `&self`. Systems keep mutable state behind interior
/// mutability so that injected references can be shared freely.
pub trait System: Send + Sync + 'static {
    /// Bind declared dependencies. Called exactly once, right after
    /// construction and before any other callback.
    fn inject(&self, _deps: &mut Dependencies<'_>) {}

    fn as_initialize(&self) -> Option<&dyn InitializeAsync> {
        None
    }

    fn as_editor_support(&self) -> Option<&dyn EditorSupport> {
        None
    }

    fn as_register_hooks(&self) -> Option<&dyn RegisterHooks> {
        None
    }

    fn as_update(&self) -> Option<&dyn Update> {
        None
    }

    fn as_late_update(&self) -> Option<&dyn LateUpdate> {
        None
    }

    fn as_fixed_update(&self) -> Option<&dyn FixedUpdate> {
        None
    }

    fn as_toggle(&self) -> Option<&dyn Toggle> {
        None
    }

    fn as_pause_aware(&self) -> Option<&dyn PauseAware> {
        None
    }

    fn as_focus_aware(&self) -> Option<&dyn FocusAware> {
        None
    }

    fn as_quit_aware(&self) -> Option<&dyn QuitAware> {
        None
    }
}

/// Asynchronous initialization, awaited during startup one system at a time.
#[async_trait]
pub trait InitializeAsync: Send + Sync {
    async fn initialize(&self) -> Result<(), SystemError>;
}

/// Initialization used instead of [`InitializeAsync`] in editor mode.
pub trait EditorSupport: Send + Sync {
    fn on_editor_initialize(&self);
}

/// Notified when the system enters and leaves the registry.
pub trait RegisterHooks: Send + Sync {
    fn on_register(&self) {}

    fn on_unregister(&self) {}
}

/// Regular per-tick update.
pub trait Update: Send + Sync {
    fn on_update(&self, delta: f32);
}

/// Runs after every regular update of the same tick.
pub trait LateUpdate: Send + Sync {
    fn on_late_update(&self, delta: f32);
}

/// Runs on the host's fixed-interval ticks.
pub trait FixedUpdate: Send + Sync {
    fn on_fixed_update(&self, delta: f32);
}

/// Runtime enable/disable switch. Disabled systems skip tick slots but stay
/// registered.
pub trait Toggle: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn set_enabled(&self, enabled: bool);
}

pub trait PauseAware: Send + Sync {
    fn on_pause(&self, paused: bool);
}

pub trait FocusAware: Send + Sync {
    fn on_focus_changed(&self, focused: bool);
}

pub trait QuitAware: Send + Sync {
    fn on_quit(&self);
}

/// Ready-made storage for a [`Toggle`] implementation. Starts enabled.
#[derive(Debug)]
pub struct EnabledFlag(AtomicBool);

impl EnabledFlag {
    pub fn new(enabled: bool) -> Self {
        Self(AtomicBool::new(enabled))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Store a new value, returning the previous one.
    pub fn set(&self, enabled: bool) -> bool {
        self.0.swap(enabled, Ordering::SeqCst)
    }
}

impl Default for EnabledFlag {
    fn default() -> Self {
        Self::new(true)
    }
}
