//! Live system instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use keel_protocols::{
    AliasConflict, Capabilities, DependencyLookup, InjectionRecord, KernelError, LifecycleState,
    System, SystemKey,
};

use crate::descriptor::{Constructed, Contract, SystemDescriptor};

/// Stable index of a registered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(usize);

impl SystemId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One registered instance and its bookkeeping.
pub struct SystemEntry {
    id: SystemId,
    key: SystemKey,
    alias: Option<String>,
    priority: i32,
    update_interval: u32,
    dependencies: Vec<SystemKey>,
    contracts: Vec<SystemKey>,
    system: Arc<dyn System>,
    any: Arc<dyn Any + Send + Sync>,
    capabilities: Capabilities,
    pub(crate) state: LifecycleState,
    pub(crate) injections: Vec<InjectionRecord>,
}

impl SystemEntry {
    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn key(&self) -> SystemKey {
        self.key
    }

    pub fn name(&self) -> &'static str {
        self.key.short_name()
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn update_interval(&self) -> u32 {
        self.update_interval
    }

    pub fn dependencies(&self) -> &[SystemKey] {
        &self.dependencies
    }

    /// Contracts this entry was registered under. A contract another
    /// system already held is not listed.
    pub fn contracts(&self) -> &[SystemKey] {
        &self.contracts
    }

    pub fn system(&self) -> &Arc<dyn System> {
        &self.system
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn injections(&self) -> &[InjectionRecord] {
        &self.injections
    }

    /// Enabled flag of the toggle capability; systems without one are
    /// always enabled.
    pub fn is_enabled(&self) -> bool {
        self.system.as_toggle().is_none_or(|toggle| toggle.is_enabled())
    }
}

impl fmt::Debug for SystemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemEntry")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("alias", &self.alias)
            .field("priority", &self.priority)
            .field("state", &self.state)
            .field("capabilities", &self.capabilities.to_string())
            .finish()
    }
}

/// Owns every live instance, keyed by type, by contract and by alias.
///
/// Ids come from a counter and are never reused, so a stale id simply
/// misses. Removing an entry frees everything it held.
#[derive(Default)]
pub struct Registry {
    entries: HashMap<SystemId, SystemEntry>,
    next_id: usize,
    by_type: HashMap<TypeId, SystemId>,
    by_contract: HashMap<TypeId, (SystemId, Arc<dyn Any + Send + Sync>)>,
    by_alias: HashMap<String, SystemId>,
    order: Vec<SystemId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an instance built from `descriptor`.
    ///
    /// Fails with `DuplicateRegistration` if the type is already present and
    /// `DuplicateAlias` if its alias is taken.
    pub fn register(
        &mut self,
        descriptor: &SystemDescriptor,
        instance: Constructed,
    ) -> Result<SystemId, KernelError> {
        self.insert(
            descriptor.key(),
            descriptor.alias().map(str::to_string),
            descriptor.priority(),
            descriptor.update_interval(),
            descriptor.dependencies().to_vec(),
            descriptor.contracts(),
            instance,
        )
    }

    /// Register an already built instance of `T` with no descriptor.
    pub fn register_instance<T: System>(
        &mut self,
        instance: Arc<T>,
        priority: i32,
    ) -> Result<SystemId, KernelError> {
        self.insert(
            SystemKey::of::<T>(),
            None,
            priority,
            1,
            Vec::new(),
            &[],
            Constructed::new(instance),
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        key: SystemKey,
        alias: Option<String>,
        priority: i32,
        update_interval: u32,
        dependencies: Vec<SystemKey>,
        contracts: &[Contract],
        instance: Constructed,
    ) -> Result<SystemId, KernelError> {
        if self.by_type.contains_key(&key.type_id()) {
            return Err(KernelError::DuplicateRegistration(key.short_name().to_string()));
        }
        if let Some(alias) = alias.as_deref() {
            if let Some(owner) = self.by_alias.get(alias).and_then(|id| self.entry(*id)) {
                return Err(KernelError::DuplicateAlias {
                    conflicts: vec![AliasConflict {
                        alias: alias.to_string(),
                        systems: vec![owner.name().to_string(), key.short_name().to_string()],
                    }],
                });
            }
        }

        let id = SystemId(self.next_id);
        self.next_id += 1;

        let mut held = Vec::new();
        for contract in contracts {
            let contract_key = contract.key();
            if let Some(owner) = self.by_contract.get(&contract_key.type_id()).and_then(|(owner, _)| self.entry(*owner)) {
                info!(
                    contract = contract_key.short_name(),
                    provider = owner.name(),
                    system = key.short_name(),
                    "Contract already provided, skipping"
                );
                continue;
            }
            if let Some(view) = contract.cast(&instance.any) {
                self.by_contract.insert(contract_key.type_id(), (id, view));
                held.push(contract_key);
            }
        }

        let capabilities = Capabilities::of(instance.system.as_ref());
        self.entries.insert(
            id,
            SystemEntry {
                id,
                key,
                alias: alias.clone(),
                priority,
                update_interval,
                dependencies,
                contracts: held,
                system: instance.system,
                any: instance.any,
                capabilities,
                state: LifecycleState::Constructed,
                injections: Vec::new(),
            },
        );
        self.by_type.insert(key.type_id(), id);
        if let Some(alias) = alias {
            self.by_alias.insert(alias, id);
        }
        self.order.push(id);

        debug!(system = key.short_name(), %id, %capabilities, "System registered");
        Ok(id)
    }

    /// Remove an instance, returning its entry.
    pub fn remove(&mut self, id: SystemId) -> Option<SystemEntry> {
        let entry = self.entries.remove(&id)?;
        self.by_type.remove(&entry.key.type_id());
        for contract in &entry.contracts {
            self.by_contract.remove(&contract.type_id());
        }
        if let Some(alias) = entry.alias.as_deref() {
            self.by_alias.remove(alias);
        }
        self.order.retain(|other| *other != id);
        debug!(system = entry.name(), %id, "System removed from registry");
        Some(entry)
    }

    pub fn get<T: System>(&self) -> Option<Arc<T>> {
        let id = self.id_of(&SystemKey::of::<T>())?;
        self.entry(id)?.any.clone().downcast::<T>().ok()
    }

    /// The instance registered under the contract `C`.
    pub fn get_contract<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        let (_, view) = self.by_contract.get(&TypeId::of::<C>())?;
        view.clone()
            .downcast::<Arc<C>>()
            .ok()
            .map(|provider| Arc::clone(&*provider))
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<dyn System>> {
        let id = self.by_alias.get(alias)?;
        self.entry(*id).map(|entry| entry.system.clone())
    }

    /// Alias lookup that also checks the concrete type.
    pub fn get_by_alias_as<T: System>(&self, alias: &str) -> Option<Arc<T>> {
        let id = self.by_alias.get(alias)?;
        self.entry(*id)?.any.clone().downcast::<T>().ok()
    }

    /// Lookup by alias, short type name or full type name.
    pub fn find(&self, name: &str) -> Option<&SystemEntry> {
        if let Some(id) = self.by_alias.get(name) {
            return self.entry(*id);
        }
        self.entries()
            .find(|entry| entry.name() == name || entry.key.type_name() == name)
    }

    pub fn id_of(&self, key: &SystemKey) -> Option<SystemId> {
        self.by_type.get(&key.type_id()).copied()
    }

    /// Whether `key` is registered, as a concrete type or a contract.
    pub fn contains(&self, key: &SystemKey) -> bool {
        self.by_type.contains_key(&key.type_id()) || self.by_contract.contains_key(&key.type_id())
    }

    pub fn entry(&self, id: SystemId) -> Option<&SystemEntry> {
        self.entries.get(&id)
    }

    pub(crate) fn entry_mut(&mut self, id: SystemId) -> Option<&mut SystemEntry> {
        self.entries.get_mut(&id)
    }

    /// Every instance in registration order.
    pub fn all(&self) -> Vec<Arc<dyn System>> {
        self.entries().map(|entry| entry.system.clone()).collect()
    }

    /// Every entry in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &SystemEntry> {
        self.order.iter().filter_map(|id| self.entry(*id))
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> Vec<SystemId> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl DependencyLookup for Registry {
    fn lookup(&self, type_id: TypeId) -> Option<Arc<dyn Any + Send + Sync>> {
        if let Some(id) = self.by_type.get(&type_id) {
            return self.entry(*id).map(|entry| entry.any.clone());
        }
        self.by_contract.get(&type_id).map(|(_, view)| view.clone())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}
