//! The kernel facade.
//!
//! Owns one catalog, registry, dispatcher and event bus, and wires them
//! together. Create one per process or per test; there is no global
//! instance.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use keel_events::EventBus;
use keel_protocols::{Injectable, InjectionRecord, KernelError, LifecycleState, System, SystemKey};

use crate::catalog::{Catalog, DiscoveryOptions};
use crate::descriptor::SystemDescriptor;
use crate::dispatcher::{BringUp, Dispatcher, DispatcherOptions, StartupReport};
use crate::injector;
use crate::kernel_events::{
    KernelInitialized, SystemEnabledChanged, SystemRegistered, SystemUnregistered,
};
use crate::registry::{Registry, SystemId};
use crate::resolver::{Resolution, resolve};

#[cfg(test)]
#[path = "kernel_tests.rs"]
mod tests;

/// Kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum KernelState {
    /// Initial state, not started.
    Created = 0,
    /// Bringing systems up.
    Starting = 1,
    /// Running and ticking.
    Running = 2,
    /// Tearing systems down.
    ShuttingDown = 3,
    /// Stopped.
    Stopped = 4,
}

impl From<u8> for KernelState {
    fn from(v: u8) -> Self {
        match v {
            0 => KernelState::Created,
            1 => KernelState::Starting,
            2 => KernelState::Running,
            3 => KernelState::ShuttingDown,
            4 => KernelState::Stopped,
            _ => KernelState::Created,
        }
    }
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KernelState::Created => "created",
            KernelState::Starting => "starting",
            KernelState::Running => "running",
            KernelState::ShuttingDown => "shutting_down",
            KernelState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Snapshot of one registered system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub name: String,
    pub alias: Option<String>,
    pub priority: i32,
    pub state: LifecycleState,
    pub enabled: bool,
    pub can_toggle: bool,
    pub capabilities: Vec<&'static str>,
    pub last_update_ms: Option<f64>,
    pub average_update_ms: Option<f64>,
}

/// Declared and injected dependencies of one system.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyNode {
    pub name: String,
    pub declared: Vec<String>,
    pub injected: Vec<InjectionRecord>,
}

/// Builder for [`Kernel`].
///
/// ```ignore
/// let kernel = Kernel::builder()
///     .system(SystemDescriptor::default_of::<Clock>().auto_register())
///     .system(SystemDescriptor::default_of::<Audio>().depends_on::<Clock>())
///     .symbol("DEBUG")
///     .build();
/// kernel.start().await?;
/// ```
#[derive(Default)]
pub struct KernelBuilder {
    catalog: Catalog,
    discovery: DiscoveryOptions,
    dispatch: DispatcherOptions,
    bus: Option<EventBus>,
}

impl KernelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a system for the automatic scan.
    pub fn system(mut self, descriptor: SystemDescriptor) -> Self {
        self.catalog.declare(descriptor);
        self
    }

    /// Declare a system that is always discovered.
    pub fn manual(mut self, descriptor: SystemDescriptor) -> Self {
        self.catalog.declare_manual(descriptor);
        self
    }

    /// Activate a conditional-enable symbol.
    pub fn symbol(mut self, symbol: impl Into<String>) -> Self {
        self.discovery.symbols.insert(symbol.into());
        self
    }

    pub fn symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discovery
            .symbols
            .extend(symbols.into_iter().map(Into::into));
        self
    }

    /// Disable a system by alias or type name.
    pub fn disable(mut self, name: impl Into<String>) -> Self {
        self.discovery.disabled.insert(name.into());
        self
    }

    /// Replace the declared priority of a system, by alias or type name.
    pub fn priority_override(mut self, name: impl Into<String>, priority: i32) -> Self {
        self.discovery
            .priority_overrides
            .insert(name.into(), priority);
        self
    }

    /// Only discover descriptors marked for the automatic scan.
    pub fn require_auto_register(mut self, required: bool) -> Self {
        self.discovery.require_auto_register = required;
        self
    }

    pub fn editor_mode(mut self, enabled: bool) -> Self {
        self.dispatch.editor_mode = enabled;
        self
    }

    pub fn profiling(mut self, enabled: bool) -> Self {
        self.dispatch.profiling = enabled;
        self
    }

    /// Share an existing bus instead of creating one.
    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn build(self) -> Kernel {
        Kernel {
            catalog: self.catalog,
            discovery: RwLock::new(self.discovery),
            registry: RwLock::new(Registry::new()),
            dispatcher: Dispatcher::new(self.dispatch),
            bus: self.bus.unwrap_or_default(),
            state: AtomicU8::new(KernelState::Created as u8),
            report: Mutex::new(None),
        }
    }
}

/// The application kernel.
pub struct Kernel {
    catalog: Catalog,
    discovery: RwLock<DiscoveryOptions>,
    registry: RwLock<Registry>,
    dispatcher: Dispatcher,
    bus: EventBus,
    state: AtomicU8,
    report: Mutex<Option<StartupReport>>,
}

impl Kernel {
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    /// Get kernel state.
    pub fn state(&self) -> KernelState {
        KernelState::from(self.state.load(Ordering::SeqCst))
    }

    /// Check if kernel is running.
    pub fn is_running(&self) -> bool {
        self.state() == KernelState::Running
    }

    fn set_state(&self, state: KernelState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: KernelState, to: KernelState) -> Result<(), KernelError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|found| KernelError::InvalidState {
                expected: from.to_string(),
                found: KernelState::from(found).to_string(),
            })
    }

    /// Discover and resolve without constructing anything.
    pub fn plan(&self) -> Result<Resolution, KernelError> {
        let discovery = self.catalog.discover(&self.discovery.read())?;
        resolve(&discovery)
    }

    /// Activate a conditional-enable symbol. Takes effect at the next
    /// [`plan`](Self::plan) or [`start`](Self::start); running systems are
    /// not touched.
    pub fn add_symbol(&self, symbol: impl Into<String>) -> bool {
        let symbol = symbol.into();
        let added = self.discovery.write().symbols.insert(symbol.clone());
        if added {
            info!(symbol = %symbol, "Symbol added");
        }
        added
    }

    pub fn remove_symbol(&self, symbol: &str) -> bool {
        let removed = self.discovery.write().symbols.remove(symbol);
        if removed {
            info!(symbol, "Symbol removed");
        }
        removed
    }

    pub fn has_symbol(&self, symbol: &str) -> bool {
        self.discovery.read().symbols.contains(symbol)
    }

    /// Bring every resolved system up, one at a time.
    ///
    /// Configuration errors abort startup and leave the kernel stopped. A
    /// system whose initializer fails is reported and excluded from ticks
    /// while the rest start normally.
    pub async fn start(&self) -> Result<StartupReport, KernelError> {
        self.transition(KernelState::Created, KernelState::Starting)?;
        info!(declared = self.catalog.len(), "Kernel starting...");

        let resolution = match self.plan() {
            Ok(resolution) => resolution,
            Err(e) => {
                error!(error = %e, "Failed to resolve systems");
                self.set_state(KernelState::Stopped);
                return Err(e);
            }
        };

        if let Err(e) = self.register_bus() {
            self.set_state(KernelState::Stopped);
            return Err(e);
        }

        let report = match self.dispatcher.start(&resolution, &self.registry).await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Startup aborted");
                self.dispatcher.teardown(&self.registry);
                self.set_state(KernelState::Stopped);
                return Err(e);
            }
        };

        for name in &report.active {
            self.announce_registered(name);
        }
        self.bus.publish(KernelInitialized {
            active: report.active.clone(),
            failed: report.failed.iter().map(|f| f.name.clone()).collect(),
        });

        self.set_state(KernelState::Running);
        info!(
            active = report.active.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            "Kernel started"
        );
        *self.report.lock() = Some(report.clone());
        Ok(report)
    }

    fn register_bus(&self) -> Result<(), KernelError> {
        let mut registry = self.registry.write();
        let id = registry.register_instance(Arc::new(self.bus.clone()), i32::MIN)?;
        if let Some(entry) = registry.entry_mut(id) {
            entry.state = LifecycleState::Active;
        }
        Ok(())
    }

    fn announce_registered(&self, name: &str) {
        let alias = self
            .registry
            .read()
            .find(name)
            .and_then(|entry| entry.alias().map(str::to_string));
        self.bus.publish(SystemRegistered {
            name: name.to_string(),
            alias,
        });
    }

    /// Tear every system down in reverse order and clear the bus.
    pub async fn stop(&self) -> Result<(), KernelError> {
        self.transition(KernelState::Running, KernelState::ShuttingDown)?;
        info!("Kernel shutting down...");

        self.dispatcher.teardown(&self.registry);
        self.bus.reset();

        self.set_state(KernelState::Stopped);
        info!("Kernel stopped");
        Ok(())
    }

    /// Construct, inject, register and initialize one more system while
    /// running. Returns `None` when the type is already registered.
    pub async fn register_system(
        &self,
        descriptor: SystemDescriptor,
    ) -> Result<Option<BringUp>, KernelError> {
        self.ensure_running()?;
        if self.registry.read().contains(&descriptor.key()) {
            info!(system = descriptor.name(), "System already registered, skipping");
            return Ok(None);
        }

        let outcome = self.dispatcher.bring_up(&descriptor, &self.registry).await?;
        if matches!(outcome, BringUp::Active(_)) {
            self.announce_registered(descriptor.name());
        }
        Ok(Some(outcome))
    }

    /// Unregister the system of type `T`.
    pub fn unregister<T: System>(&self) -> Result<(), KernelError> {
        let key = SystemKey::of::<T>();
        let id = self.registry.read().id_of(&key);
        self.unregister_id(id, key.short_name())
    }

    /// Unregister a system by alias or type name.
    pub fn unregister_by_name(&self, name: &str) -> Result<(), KernelError> {
        let id = self.registry.read().find(name).map(|entry| entry.id());
        self.unregister_id(id, name)
    }

    fn unregister_id(&self, id: Option<SystemId>, name: &str) -> Result<(), KernelError> {
        let entry = id
            .and_then(|id| self.dispatcher.unregister(id, &self.registry))
            .ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        self.bus.publish(SystemUnregistered {
            name: entry.name().to_string(),
        });
        Ok(())
    }

    /// Flip the enabled flag of `T`.
    ///
    /// Returns `Ok(false)` when `T` has no toggle capability.
    pub fn set_enabled<T: System>(&self, enabled: bool) -> Result<bool, KernelError> {
        let key = SystemKey::of::<T>();
        let found = {
            let registry = self.registry.read();
            registry
                .id_of(&key)
                .and_then(|id| registry.entry(id))
                .map(|entry| entry.system().clone())
        };
        let system = found.ok_or_else(|| KernelError::NotFound(key.short_name().to_string()))?;
        Ok(self.apply_enabled(key.short_name(), system.as_ref(), enabled))
    }

    /// Flip the enabled flag of a system found by alias or type name.
    pub fn set_enabled_by_name(&self, name: &str, enabled: bool) -> Result<bool, KernelError> {
        let found = self
            .registry
            .read()
            .find(name)
            .map(|entry| (entry.name(), entry.system().clone()));
        let (system_name, system) = found.ok_or_else(|| KernelError::NotFound(name.to_string()))?;
        Ok(self.apply_enabled(system_name, system.as_ref(), enabled))
    }

    fn apply_enabled(&self, name: &str, system: &dyn System, enabled: bool) -> bool {
        let Some(toggle) = system.as_toggle() else {
            warn!(system = name, "System cannot be toggled");
            return false;
        };
        let previous = toggle.is_enabled();
        toggle.set_enabled(enabled);
        if previous != enabled {
            info!(system = name, enabled, "System enabled state changed");
            self.bus.publish(SystemEnabledChanged {
                name: name.to_string(),
                enabled,
            });
        }
        true
    }

    fn ensure_running(&self) -> Result<(), KernelError> {
        let state = self.state();
        if state == KernelState::Running {
            Ok(())
        } else {
            Err(KernelError::InvalidState {
                expected: KernelState::Running.to_string(),
                found: state.to_string(),
            })
        }
    }

    /// Stop invoking update, late-update and fixed-update slots.
    pub fn suspend(&self) {
        self.dispatcher.suspend();
    }

    pub fn resume(&self) {
        self.dispatcher.resume();
    }

    pub fn is_suspended(&self) -> bool {
        self.dispatcher.is_suspended()
    }

    pub fn tick(&self, delta: f32) {
        if self.is_running() {
            self.dispatcher.tick(delta);
        }
    }

    pub fn late_tick(&self, delta: f32) {
        if self.is_running() {
            self.dispatcher.late_tick(delta);
        }
    }

    pub fn fixed_tick(&self, delta: f32) {
        if self.is_running() {
            self.dispatcher.fixed_tick(delta);
        }
    }

    pub fn pause(&self, paused: bool) {
        if self.is_running() {
            self.dispatcher.pause(paused);
        }
    }

    pub fn focus(&self, focused: bool) {
        if self.is_running() {
            self.dispatcher.focus(focused);
        }
    }

    pub fn quit(&self) {
        if self.is_running() {
            self.dispatcher.quit();
        }
    }

    pub fn get<T: System>(&self) -> Option<Arc<T>> {
        self.registry.read().get::<T>()
    }

    /// The system registered under the contract `C`.
    pub fn get_contract<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.registry.read().get_contract::<C>()
    }

    pub fn get_by_alias(&self, alias: &str) -> Option<Arc<dyn System>> {
        self.registry.read().get_by_alias(alias)
    }

    /// Bind `target`'s dependencies from the registered systems.
    ///
    /// For values the kernel does not own. Works in any kernel state; only
    /// what is registered at the time of the call can be bound.
    pub fn inject_into<T: Injectable + 'static>(&self, target: &T) -> Result<Vec<InjectionRecord>, KernelError> {
        let name = SystemKey::of::<T>().short_name();
        let registry = self.registry.read();
        injector::inject_object(name, target, &registry).inspect_err(|e| {
            warn!(target = name, error = %e, "Injection incomplete");
        })
    }

    pub fn get_by_alias_as<T: System>(&self, alias: &str) -> Option<Arc<T>> {
        self.registry.read().get_by_alias_as::<T>(alias)
    }

    /// Every registered system in initialization order.
    pub fn systems(&self) -> Vec<Arc<dyn System>> {
        self.registry.read().all()
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Report of the last successful start.
    pub fn report(&self) -> Option<StartupReport> {
        self.report.lock().clone()
    }

    pub fn status(&self) -> Vec<SystemStatus> {
        let registry = self.registry.read();
        registry
            .entries()
            .map(|entry| {
                let stats = self.dispatcher.stats(entry.id());
                SystemStatus {
                    name: entry.name().to_string(),
                    alias: entry.alias().map(str::to_string),
                    priority: entry.priority(),
                    state: entry.state(),
                    enabled: entry.is_enabled(),
                    can_toggle: entry.system().as_toggle().is_some(),
                    capabilities: entry.capabilities().names(),
                    last_update_ms: stats
                        .as_ref()
                        .and_then(|s| s.last())
                        .map(|d| d.as_secs_f64() * 1000.0),
                    average_update_ms: stats
                        .as_ref()
                        .and_then(|s| s.average())
                        .map(|d| d.as_secs_f64() * 1000.0),
                }
            })
            .collect()
    }

    pub fn dependency_graph(&self) -> Vec<DependencyNode> {
        let registry = self.registry.read();
        registry
            .entries()
            .map(|entry| DependencyNode {
                name: entry.name().to_string(),
                declared: entry
                    .dependencies()
                    .iter()
                    .map(|key| key.short_name().to_string())
                    .collect(),
                injected: entry.injections().to_vec(),
            })
            .collect()
    }

    /// Render [`dependency_graph`](Self::dependency_graph) as indented text.
    pub fn export_dependency_graph(&self) -> String {
        let mut out = String::new();
        for node in self.dependency_graph() {
            let _ = writeln!(out, "{}", node.name);
            for dep in &node.declared {
                let _ = writeln!(out, "  -> {}", dep);
            }
            for record in &node.injected {
                if !record.optional && node.declared.iter().any(|d| d == record.dependency) {
                    continue;
                }
                let mut tags = vec!["injected"];
                if record.optional {
                    tags.push("optional");
                }
                if !record.resolved {
                    tags.push("missing");
                }
                let _ = writeln!(out, "  -> {} [{}]", record.dependency, tags.join(", "));
            }
        }
        out
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("state", &self.state())
            .field("systems", &self.registry.read().len())
            .finish()
    }
}
