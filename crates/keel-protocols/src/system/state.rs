//! Per-instance lifecycle state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a system instance is in its lifecycle.
///
/// `Discovered → Constructed → Injected → Initializing → Active`, with
/// `Failed` for an initializer that errored and `Destroyed` reachable from
/// any state on teardown. Enabled/disabled is a separate runtime flag and is
/// not represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Discovered,
    Constructed,
    Injected,
    Initializing,
    Active,
    Failed,
    Destroyed,
}

impl LifecycleState {
    /// Whether the instance may receive tick and notification callbacks.
    pub fn is_active(self) -> bool {
        self == LifecycleState::Active
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Discovered => "discovered",
            LifecycleState::Constructed => "constructed",
            LifecycleState::Injected => "injected",
            LifecycleState::Initializing => "initializing",
            LifecycleState::Active => "active",
            LifecycleState::Failed => "failed",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}
