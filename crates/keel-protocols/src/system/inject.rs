//! Explicit dependency injection.
//!
//! A system holds one [`Inject<T>`] slot per dependency and binds them in
//! [`System::inject`](super::System::inject):
//!
//! ```ignore
//! fn inject(&self, deps: &mut Dependencies<'_>) {
//!     deps.bind(&self.clock);
//!     deps.bind_optional(&self.audio);
//!     deps.bind_contract(&self.mixer); // Inject<dyn Mixer>
//! }
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::SystemKey;

/// Write-once slot for an injected dependency.
///
/// `T` is either a concrete system type or a contract trait object such as
/// `dyn Mixer`.
pub struct Inject<T: ?Sized> {
    slot: OnceLock<Arc<T>>,
}

impl<T: ?Sized> Inject<T> {
    pub const fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.slot.get().map(Arc::as_ref)
    }

    pub fn shared(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    fn fill(&self, value: Arc<T>) {
        // A slot is bound once; later binds keep the first value.
        let _ = self.slot.set(value);
    }
}

impl<T: ?Sized> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inject")
            .field("type", &SystemKey::of::<T>().short_name())
            .field("bound", &self.is_bound())
            .finish()
    }
}

/// Source of already constructed instances.
///
/// A concrete type id yields the instance itself. A contract type id yields
/// an `Arc<C>` boxed as `Any`, where `C` is the contract trait object.
pub trait DependencyLookup {
    fn lookup(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// A value outside the registry that takes dependencies from it.
///
/// Systems bind through [`System::inject`](super::System::inject); anything
/// else implements this and is handed to the kernel's `inject_into`.
pub trait Injectable {
    fn inject(&self, deps: &mut Dependencies<'_>);
}

/// One bind attempt made during injection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InjectionRecord {
    pub dependency: &'static str,
    pub optional: bool,
    pub resolved: bool,
}

/// Binder handed to [`System::inject`](super::System::inject).
pub struct Dependencies<'a> {
    lookup: &'a dyn DependencyLookup,
    records: Vec<InjectionRecord>,
}

impl<'a> Dependencies<'a> {
    pub fn new(lookup: &'a dyn DependencyLookup) -> Self {
        Self {
            lookup,
            records: Vec::new(),
        }
    }

    /// Bind a mandatory dependency. A miss is reported by the injector once
    /// `inject` returns.
    pub fn bind<T: Send + Sync + 'static>(&mut self, slot: &Inject<T>) -> bool {
        self.bind_inner(slot, false)
    }

    /// Bind an optional dependency. A miss leaves the slot empty.
    pub fn bind_optional<T: Send + Sync + 'static>(&mut self, slot: &Inject<T>) -> bool {
        self.bind_inner(slot, true)
    }

    /// Look up an instance without a slot.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.lookup
            .lookup(TypeId::of::<T>())
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Bind a mandatory dependency on a contract trait object.
    pub fn bind_contract<C: ?Sized + Send + Sync + 'static>(&mut self, slot: &Inject<C>) -> bool {
        let found = self.resolve_contract::<C>();
        self.fill(slot, found, false)
    }

    pub fn bind_contract_optional<C: ?Sized + Send + Sync + 'static>(
        &mut self,
        slot: &Inject<C>,
    ) -> bool {
        let found = self.resolve_contract::<C>();
        self.fill(slot, found, true)
    }

    /// Look up whichever instance provides the contract `C`.
    pub fn resolve_contract<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.lookup
            .lookup(TypeId::of::<C>())
            .and_then(|any| any.downcast::<Arc<C>>().ok())
            .map(|provider| Arc::clone(&*provider))
    }

    fn bind_inner<T: Send + Sync + 'static>(&mut self, slot: &Inject<T>, optional: bool) -> bool {
        let found = self.resolve::<T>();
        self.fill(slot, found, optional)
    }

    fn fill<T: ?Sized + 'static>(&mut self, slot: &Inject<T>, found: Option<Arc<T>>, optional: bool) -> bool {
        let resolved = found.is_some();
        if let Some(value) = found {
            slot.fill(value);
        }
        self.records.push(InjectionRecord {
            dependency: SystemKey::of::<T>().short_name(),
            optional,
            resolved,
        });
        resolved
    }

    /// Mandatory dependencies that could not be resolved, in bind order.
    pub fn missing(&self) -> Vec<&'static str> {
        self.records
            .iter()
            .filter(|r| !r.optional && !r.resolved)
            .map(|r| r.dependency)
            .collect()
    }

    pub fn records(&self) -> &[InjectionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<InjectionRecord> {
        self.records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Clock(u32);
    struct Mixer;

    #[derive(Default)]
    struct Table(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

    impl Table {
        fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
            self.0.insert(TypeId::of::<T>(), Arc::new(value));
            self
        }
    }

    impl DependencyLookup for Table {
        fn lookup(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
            self.0.get(&type_id).cloned()
        }
    }

    #[test]
    fn test_bind_fills_slot() {
        let table = Table::default().with(Clock(7));
        let slot: Inject<Clock> = Inject::new();
        let mut deps = Dependencies::new(&table);

        assert!(deps.bind(&slot));
        assert_eq!(slot.get().map(|c| c.0), Some(7));
        assert!(deps.missing().is_empty());
    }

    #[test]
    fn test_mandatory_miss_is_reported() {
        let table = Table::default();
        let clock: Inject<Clock> = Inject::new();
        let mixer: Inject<Mixer> = Inject::new();
        let mut deps = Dependencies::new(&table);

        assert!(!deps.bind(&clock));
        assert!(!deps.bind(&mixer));
        assert_eq!(deps.missing(), vec!["Clock", "Mixer"]);
        assert!(!clock.is_bound());
    }

    #[test]
    fn test_optional_miss_is_not_reported() {
        let table = Table::default();
        let mixer: Inject<Mixer> = Inject::new();
        let mut deps = Dependencies::new(&table);

        assert!(!deps.bind_optional(&mixer));
        assert!(deps.missing().is_empty());

        let records = deps.into_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].optional);
        assert!(!records[0].resolved);
    }

    #[test]
    fn test_slot_binds_once() {
        let first = Table::default().with(Clock(1));
        let second = Table::default().with(Clock(2));
        let slot: Inject<Clock> = Inject::new();

        Dependencies::new(&first).bind(&slot);
        Dependencies::new(&second).bind(&slot);
        assert_eq!(slot.get().map(|c| c.0), Some(1));
    }

    mod contract {
        use super::*;

        trait Mixer: Send + Sync {
            fn channels(&self) -> u32;
        }

        impl Mixer for Clock {
            fn channels(&self) -> u32 {
                self.0
            }
        }

        #[test]
        fn test_bind_contract_fills_trait_object_slot() {
            let mut table = Table::default();
            let provider: Arc<dyn Mixer> = Arc::new(Clock(8));
            table.0.insert(TypeId::of::<dyn Mixer>(), Arc::new(provider));

            let slot: Inject<dyn Mixer> = Inject::new();
            let mut deps = Dependencies::new(&table);
            assert!(deps.bind_contract(&slot));
            assert_eq!(slot.get().map(|m| m.channels()), Some(8));
            assert_eq!(deps.records()[0].dependency, "Mixer");
        }

        #[test]
        fn test_missing_contract_is_reported() {
            let table = Table::default().with(Clock(1));
            let required: Inject<dyn Mixer> = Inject::new();
            let optional: Inject<dyn Mixer> = Inject::new();
            let mut deps = Dependencies::new(&table);

            assert!(!deps.bind_contract_optional(&optional));
            assert!(!deps.bind_contract(&required));
            assert_eq!(deps.missing(), vec!["Mixer"]);
        }
    }

    #[test]
    fn test_debug_shows_binding() {
        let slot: Inject<Mixer> = Inject::default();
        let text = format!("{:?}", slot);
        assert!(text.contains("Mixer"));
        assert!(text.contains("false"));
    }
}
