//! Dependency injection into freshly constructed instances.

use tracing::debug;

use keel_protocols::{Dependencies, Injectable, InjectionRecord, KernelError, System, SystemKey};

use crate::registry::Registry;

/// Bind `system`'s dependencies from `registry`.
///
/// Two checks run independently of the resolver: every key in `declared`
/// must already be registered, and every mandatory slot the system binds
/// must resolve. Misses from both are reported together.
pub fn inject(
    name: &str,
    declared: &[SystemKey],
    system: &dyn System,
    registry: &Registry,
) -> Result<Vec<InjectionRecord>, KernelError> {
    let mut deps = Dependencies::new(registry);
    system.inject(&mut deps);
    finish(name, missing_declared(declared, registry), deps)
}

/// Bind the dependencies of a value the registry does not own.
///
/// Mandatory misses fail with `UnsatisfiedDependency`; slots that did
/// resolve stay bound.
pub fn inject_object<T: Injectable + ?Sized>(
    name: &str,
    target: &T,
    registry: &Registry,
) -> Result<Vec<InjectionRecord>, KernelError> {
    let mut deps = Dependencies::new(registry);
    target.inject(&mut deps);
    finish(name, Vec::new(), deps)
}

fn missing_declared(declared: &[SystemKey], registry: &Registry) -> Vec<String> {
    declared
        .iter()
        .filter(|key| !registry.contains(key))
        .map(|key| key.short_name().to_string())
        .collect()
}

fn finish(
    name: &str,
    mut missing: Vec<String>,
    deps: Dependencies<'_>,
) -> Result<Vec<InjectionRecord>, KernelError> {
    for dependency in deps.missing() {
        if !missing.iter().any(|m| m == dependency) {
            missing.push(dependency.to_string());
        }
    }

    if !missing.is_empty() {
        return Err(KernelError::UnsatisfiedDependency {
            system: name.to_string(),
            missing,
        });
    }

    let records = deps.into_records();
    debug!(
        system = name,
        bound = records.iter().filter(|r| r.resolved).count(),
        "Dependencies injected"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use keel_protocols::Inject;

    use crate::descriptor::SystemDescriptor;

    #[derive(Default)]
    struct Clock;
    impl System for Clock {}

    #[derive(Default)]
    struct Mixer;
    impl System for Mixer {}

    #[derive(Default)]
    struct Audio {
        clock: Inject<Clock>,
        mixer: Inject<Mixer>,
    }

    impl System for Audio {
        fn inject(&self, deps: &mut Dependencies<'_>) {
            deps.bind(&self.clock);
            deps.bind_optional(&self.mixer);
        }
    }

    fn registry_with_clock() -> Registry {
        let mut registry = Registry::new();
        let descriptor = SystemDescriptor::default_of::<Clock>();
        registry
            .register(&descriptor, descriptor.construct().unwrap())
            .unwrap();
        registry
    }

    #[test]
    fn test_mandatory_bound_optional_left_empty() {
        let registry = registry_with_clock();
        let audio = Audio::default();

        let records = inject("Audio", &[SystemKey::of::<Clock>()], &audio, &registry).unwrap();
        assert!(audio.clock.is_bound());
        assert!(!audio.mixer.is_bound());
        assert_eq!(records.len(), 2);
        assert!(records[1].optional && !records[1].resolved);
    }

    #[test]
    fn test_unsatisfied_lists_every_miss() {
        let registry = Registry::new();
        let audio = Audio::default();

        let err = inject(
            "Audio",
            &[SystemKey::of::<Mixer>(), SystemKey::of::<Clock>()],
            &audio,
            &registry,
        )
        .unwrap_err();
        match err {
            KernelError::UnsatisfiedDependency { system, missing } => {
                assert_eq!(system, "Audio");
                assert_eq!(missing, vec!["Mixer", "Clock"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_declared_edge_checked_without_slot() {
        let registry = Registry::new();
        let err = inject("Clock", &[SystemKey::of::<Mixer>()], &Clock, &registry).unwrap_err();
        assert!(matches!(err, KernelError::UnsatisfiedDependency { ref missing, .. } if missing == &["Mixer"]));
    }

    #[derive(Default)]
    struct Panel {
        clock: Inject<Clock>,
        mixer: Inject<Mixer>,
    }

    impl Injectable for Panel {
        fn inject(&self, deps: &mut Dependencies<'_>) {
            deps.bind(&self.clock);
            deps.bind(&self.mixer);
        }
    }

    #[test]
    fn test_object_injection_keeps_resolved_slots_on_miss() {
        let registry = registry_with_clock();
        let panel = Panel::default();

        let err = inject_object("Panel", &panel, &registry).unwrap_err();
        assert!(matches!(err, KernelError::UnsatisfiedDependency { ref missing, .. } if missing == &["Mixer"]));
        assert!(panel.clock.is_bound());
        assert!(!panel.mixer.is_bound());
    }

    #[test]
    fn test_injected_instance_is_shared() {
        let registry = registry_with_clock();
        let audio = Audio::default();
        inject("Audio", &[], &audio, &registry).unwrap();

        let registered = registry.get::<Clock>().unwrap();
        assert!(Arc::ptr_eq(&audio.clock.shared().unwrap(), &registered));
    }
}
