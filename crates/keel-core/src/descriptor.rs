//! Static metadata about a system type.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use keel_protocols::{System, SystemError, SystemKey};

/// A freshly constructed instance, viewed both as a system and as `Any` so
/// that typed lookups can downcast it.
#[derive(Clone)]
pub struct Constructed {
    pub system: Arc<dyn System>,
    pub any: Arc<dyn Any + Send + Sync>,
}

impl Constructed {
    pub fn new<T: System>(instance: Arc<T>) -> Self {
        Self {
            system: instance.clone(),
            any: instance,
        }
    }
}

type Factory = Arc<dyn Fn() -> Result<Constructed, SystemError> + Send + Sync>;

type ContractCast = Arc<dyn Fn(&Arc<dyn Any + Send + Sync>) -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync>;

/// A trait object a system is also registered under.
#[derive(Clone)]
pub struct Contract {
    key: SystemKey,
    cast: ContractCast,
}

impl Contract {
    pub fn key(&self) -> SystemKey {
        self.key
    }

    /// View `instance` as the contract. The result holds an `Arc<C>`.
    pub(crate) fn cast(&self, instance: &Arc<dyn Any + Send + Sync>) -> Option<Arc<dyn Any + Send + Sync>> {
        (self.cast)(instance)
    }
}

/// Everything the kernel knows about a system type before it exists.
///
/// ```ignore
/// SystemDescriptor::of(|| Ok(AudioSystem::default()))
///     .with_priority(10)
///     .depends_on::<Clock>()
///     .with_alias("audio")
///     .provides::<dyn Mixer, AudioSystem>(|audio| audio)
///     .auto_register();
/// ```
#[derive(Clone)]
pub struct SystemDescriptor {
    key: SystemKey,
    priority: i32,
    dependencies: Vec<SystemKey>,
    contracts: Vec<Contract>,
    fallback: bool,
    alias: Option<String>,
    symbol: Option<String>,
    auto_register: bool,
    update_interval: u32,
    factory: Factory,
}

impl SystemDescriptor {
    /// Descriptor for `T`, built by `factory`.
    pub fn of<T, F>(factory: F) -> Self
    where
        T: System,
        F: Fn() -> Result<T, SystemError> + Send + Sync + 'static,
    {
        Self {
            key: SystemKey::of::<T>(),
            priority: 0,
            dependencies: Vec::new(),
            contracts: Vec::new(),
            fallback: false,
            alias: None,
            symbol: None,
            auto_register: false,
            update_interval: 1,
            factory: Arc::new(move || factory().map(|system| Constructed::new(Arc::new(system)))),
        }
    }

    /// Descriptor for a `Default`-constructible `T`.
    pub fn default_of<T: System + Default>() -> Self {
        Self::of(|| Ok(T::default()))
    }

    /// Lower runs earlier.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// `T` must be constructed before this system.
    #[must_use]
    pub fn depends_on<T: System>(mut self) -> Self {
        let key = SystemKey::of::<T>();
        if !self.dependencies.contains(&key) {
            self.dependencies.push(key);
        }
        self
    }

    /// Some system providing the contract `C` must be constructed before
    /// this one.
    #[must_use]
    pub fn depends_on_contract<C: ?Sized + 'static>(mut self) -> Self {
        let key = SystemKey::of::<C>();
        if !self.dependencies.contains(&key) {
            self.dependencies.push(key);
        }
        self
    }

    /// Also register the instance under the contract `C`. `cast` turns the
    /// concrete instance into the trait object, usually `|system| system`.
    ///
    /// The first registered provider of a contract keeps it.
    #[must_use]
    pub fn provides<C, T>(mut self, cast: impl Fn(Arc<T>) -> Arc<C> + Send + Sync + 'static) -> Self
    where
        C: ?Sized + Send + Sync + 'static,
        T: System,
    {
        let key = SystemKey::of::<C>();
        if self.contracts.iter().any(|contract| contract.key == key) {
            return self;
        }
        let cast = move |instance: &Arc<dyn Any + Send + Sync>| -> Option<Arc<dyn Any + Send + Sync>> {
            let concrete = instance.clone().downcast::<T>().ok()?;
            Some(Arc::new(cast(concrete)))
        };
        self.contracts.push(Contract {
            key,
            cast: Arc::new(cast),
        });
        self
    }

    /// Only take part when no other discovered system provides any of this
    /// system's contracts.
    #[must_use]
    pub fn as_fallback(mut self) -> Self {
        self.fallback = true;
        self
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Only discover this system when `symbol` is active.
    #[must_use]
    pub fn when(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Mark as eligible for the automatic scan.
    #[must_use]
    pub fn auto_register(mut self) -> Self {
        self.auto_register = true;
        self
    }

    /// Run the update slot every `interval` ticks. Zero is treated as one.
    #[must_use]
    pub fn with_update_interval(mut self, interval: u32) -> Self {
        self.update_interval = interval.max(1);
        self
    }

    pub(crate) fn set_priority(&mut self, priority: i32) {
        self.priority = priority;
    }

    pub fn key(&self) -> SystemKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.short_name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn dependencies(&self) -> &[SystemKey] {
        &self.dependencies
    }

    pub fn contracts(&self) -> &[Contract] {
        &self.contracts
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    /// Whether a dependency on `key` is met by this system, as its concrete
    /// type or one of its contracts.
    pub fn satisfies(&self, key: &SystemKey) -> bool {
        self.key == *key || self.contracts.iter().any(|contract| contract.key == *key)
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn is_auto_register(&self) -> bool {
        self.auto_register
    }

    pub fn update_interval(&self) -> u32 {
        self.update_interval
    }

    /// Whether `name` refers to this descriptor, by alias or type name.
    pub fn matches(&self, name: &str) -> bool {
        self.alias.as_deref() == Some(name) || self.name() == name || self.key.type_name() == name
    }

    pub fn construct(&self) -> Result<Constructed, SystemError> {
        (self.factory)()
    }
}

impl fmt::Debug for SystemDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemDescriptor")
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .field("contracts", &self.contracts.iter().map(Contract::key).collect::<Vec<_>>())
            .field("fallback", &self.fallback)
            .field("alias", &self.alias)
            .field("symbol", &self.symbol)
            .field("auto_register", &self.auto_register)
            .field("update_interval", &self.update_interval)
            .finish()
    }
}
