//! Type identity for systems.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identity of a system type: its `TypeId` plus a printable name.
///
/// Equality and hashing only consider the `TypeId`.
#[derive(Clone, Copy)]
pub struct SystemKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl SystemKey {
    /// Key for the type `T`.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Type name without its module path or generic arguments. Trait
    /// objects lose their `dyn` prefix and auto-trait bounds.
    pub fn short_name(&self) -> &'static str {
        let name = self.type_name.strip_prefix("dyn ").unwrap_or(self.type_name);
        let base = name.split(['<', ' ']).next().unwrap_or(name);
        base.rsplit("::").next().unwrap_or(base)
    }
}

impl PartialEq for SystemKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for SystemKey {}

impl Hash for SystemKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SystemKey").field(&self.type_name).finish()
    }
}

impl fmt::Display for SystemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod audio {
        pub struct Mixer;
        pub struct Channel<T>(pub T);
    }

    #[test]
    fn test_short_name_strips_path() {
        let key = SystemKey::of::<audio::Mixer>();
        assert_eq!(key.short_name(), "Mixer");
        assert!(key.type_name().ends_with("audio::Mixer"));
    }

    #[test]
    fn test_short_name_strips_generics() {
        let key = SystemKey::of::<audio::Channel<audio::Mixer>>();
        assert_eq!(key.short_name(), "Channel");
    }

    #[test]
    fn test_short_name_of_trait_object() {
        trait Output {}
        assert_eq!(SystemKey::of::<dyn Output>().short_name(), "Output");
        assert_eq!(SystemKey::of::<dyn Output + Send + Sync>().short_name(), "Output");
    }

    #[test]
    fn test_equality_by_type() {
        assert_eq!(SystemKey::of::<audio::Mixer>(), SystemKey::of::<audio::Mixer>());
        assert_ne!(SystemKey::of::<audio::Mixer>(), SystemKey::of::<u32>());
    }

    #[test]
    fn test_display_uses_short_name() {
        assert_eq!(SystemKey::of::<audio::Mixer>().to_string(), "Mixer");
    }
}
