//! Capability bit masks.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::System;

/// One optional behaviour a system can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum Capability {
    InitializeAsync = 1 << 0,
    EditorSupport = 1 << 1,
    RegisterHooks = 1 << 2,
    Update = 1 << 3,
    LateUpdate = 1 << 4,
    FixedUpdate = 1 << 5,
    Toggle = 1 << 6,
    Pause = 1 << 7,
    Focus = 1 << 8,
    Quit = 1 << 9,
}

impl Capability {
    pub const ALL: [Capability; 10] = [
        Capability::InitializeAsync,
        Capability::EditorSupport,
        Capability::RegisterHooks,
        Capability::Update,
        Capability::LateUpdate,
        Capability::FixedUpdate,
        Capability::Toggle,
        Capability::Pause,
        Capability::Focus,
        Capability::Quit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::InitializeAsync => "initialize_async",
            Capability::EditorSupport => "editor_support",
            Capability::RegisterHooks => "register_hooks",
            Capability::Update => "update",
            Capability::LateUpdate => "late_update",
            Capability::FixedUpdate => "fixed_update",
            Capability::Toggle => "toggle",
            Capability::Pause => "pause",
            Capability::Focus => "focus",
            Capability::Quit => "quit",
        }
    }
}

/// Set of capabilities a system declared, read once at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Capabilities(u16);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);

    /// Query every `as_*` accessor of `system`.
    pub fn of(system: &dyn System) -> Self {
        let accessors = [
            (system.as_initialize().is_some(), Capability::InitializeAsync),
            (system.as_editor_support().is_some(), Capability::EditorSupport),
            (system.as_register_hooks().is_some(), Capability::RegisterHooks),
            (system.as_update().is_some(), Capability::Update),
            (system.as_late_update().is_some(), Capability::LateUpdate),
            (system.as_fixed_update().is_some(), Capability::FixedUpdate),
            (system.as_toggle().is_some(), Capability::Toggle),
            (system.as_pause_aware().is_some(), Capability::Pause),
            (system.as_focus_aware().is_some(), Capability::Focus),
            (system.as_quit_aware().is_some(), Capability::Quit),
        ];

        accessors
            .into_iter()
            .filter(|(present, _)| *present)
            .fold(Self::NONE, |caps, (_, cap)| caps.with(cap))
    }

    #[must_use]
    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap as u16)
    }

    pub fn contains(self, cap: Capability) -> bool {
        (self.0 & cap as u16) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Capability> {
        Capability::ALL.into_iter().filter(move |c| self.contains(*c))
    }

    pub fn names(self) -> Vec<&'static str> {
        self.iter().map(Capability::name).collect()
    }
}

impl fmt::Display for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        f.write_str(&self.names().join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{QuitAware, Update};

    struct Bare;

    impl System for Bare {}

    struct Busy;

    impl Update for Busy {
        fn on_update(&self, _delta: f32) {}
    }

    impl QuitAware for Busy {
        fn on_quit(&self) {}
    }

    impl System for Busy {
        fn as_update(&self) -> Option<&dyn Update> {
            Some(self)
        }

        fn as_quit_aware(&self) -> Option<&dyn QuitAware> {
            Some(self)
        }
    }

    #[test]
    fn test_bare_system_has_no_capabilities() {
        let caps = Capabilities::of(&Bare);
        assert!(caps.is_empty());
        assert_eq!(caps.to_string(), "none");
    }

    #[test]
    fn test_collects_declared_slots() {
        let caps = Capabilities::of(&Busy);
        assert!(caps.contains(Capability::Update));
        assert!(caps.contains(Capability::Quit));
        assert!(!caps.contains(Capability::LateUpdate));
        assert_eq!(caps.names(), vec!["update", "quit"]);
        assert_eq!(caps.to_string(), "update|quit");
    }

    #[test]
    fn test_bits_are_distinct() {
        let mut seen = 0u16;
        for cap in Capability::ALL {
            assert_eq!(seen & cap as u16, 0);
            seen |= cap as u16;
        }
    }
}
