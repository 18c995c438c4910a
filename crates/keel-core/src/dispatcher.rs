//! Lifecycle dispatcher.
//!
//! Brings systems up one at a time in resolved order and forwards host ticks
//! and notifications to the instances that are active.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use keel_protocols::{Capability, KernelError, LifecycleState, System, SystemKey};

use crate::catalog::{SkipReason, SkippedSystem};
use crate::descriptor::SystemDescriptor;
use crate::injector;
use crate::registry::{Registry, SystemEntry, SystemId};
use crate::resolver::Resolution;

/// Keys a dependency on `descriptor` can name: its type and its contracts.
fn provided_keys(descriptor: &SystemDescriptor) -> impl Iterator<Item = SystemKey> + '_ {
    std::iter::once(descriptor.key()).chain(descriptor.contracts().iter().map(|c| c.key()))
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

/// Samples kept for the rolling update-time average.
pub const STATS_WINDOW: usize = 60;

/// Update-slot timings of one system.
#[derive(Debug, Clone, Default)]
pub struct UpdateStats {
    samples: VecDeque<Duration>,
    last: Option<Duration>,
}

impl UpdateStats {
    pub fn record(&mut self, elapsed: Duration) {
        if self.samples.len() == STATS_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(elapsed);
        self.last = Some(elapsed);
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    /// Mean over the last [`STATS_WINDOW`] samples.
    pub fn average(&self) -> Option<Duration> {
        let count = u32::try_from(self.samples.len()).ok().filter(|n| *n > 0)?;
        Some(self.samples.iter().sum::<Duration>() / count)
    }

    pub fn samples(&self) -> usize {
        self.samples.len()
    }
}

/// A callback slot the dispatcher drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Update,
    LateUpdate,
    FixedUpdate,
    Pause,
    Focus,
    Quit,
}

impl Slot {
    pub const ALL: [Slot; 6] = [
        Slot::Update,
        Slot::LateUpdate,
        Slot::FixedUpdate,
        Slot::Pause,
        Slot::Focus,
        Slot::Quit,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn capability(self) -> Capability {
        match self {
            Slot::Update => Capability::Update,
            Slot::LateUpdate => Capability::LateUpdate,
            Slot::FixedUpdate => Capability::FixedUpdate,
            Slot::Pause => Capability::Pause,
            Slot::Focus => Capability::Focus,
            Slot::Quit => Capability::Quit,
        }
    }
}

/// Non-owning view of an active instance held by the slot lists.
struct Attached {
    id: SystemId,
    name: &'static str,
    priority: i32,
    update_interval: u64,
    system: Arc<dyn System>,
    last_update: AtomicU64,
    live: AtomicBool,
}

impl Attached {
    fn is_enabled(&self) -> bool {
        self.system.as_toggle().is_none_or(|toggle| toggle.is_enabled())
    }

    fn is_due(&self, tick: u64) -> bool {
        if self.update_interval <= 1 {
            return true;
        }
        let last = self.last_update.load(Ordering::Relaxed);
        if tick.saturating_sub(last) >= self.update_interval {
            self.last_update.store(tick, Ordering::Relaxed);
            true
        } else {
            false
        }
    }
}

type SlotList = Arc<Vec<Arc<Attached>>>;

/// A system that did not make it to `Active`.
#[derive(Debug, Clone, Serialize)]
pub struct FailedSystem {
    pub name: String,
    pub error: String,
}

/// What happened during startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartupReport {
    /// Resolved initialization order.
    pub order: Vec<String>,
    pub active: Vec<String>,
    pub failed: Vec<FailedSystem>,
    pub skipped: Vec<SkippedSystem>,
}

/// Outcome of bringing up one system.
#[derive(Debug, Clone)]
pub enum BringUp {
    Active(SystemId),
    Failed(FailedSystem),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherOptions {
    /// Use the editor-initialize path and skip register hooks.
    pub editor_mode: bool,
    /// Time every update-slot call.
    pub profiling: bool,
}

/// Drives instances through their lifecycle and invokes tick slots.
///
/// Slot lists are copy-on-write snapshots ordered by `(priority, id)`, so
/// callbacks run without any dispatcher lock held and may call back into
/// the kernel.
pub struct Dispatcher {
    slots: RwLock<[SlotList; 6]>,
    stats: Mutex<HashMap<SystemId, UpdateStats>>,
    tick_count: AtomicU64,
    suspended: AtomicBool,
    profiling: AtomicBool,
    editor_mode: bool,
}

impl Dispatcher {
    pub fn new(options: DispatcherOptions) -> Self {
        Self {
            slots: RwLock::new(Default::default()),
            stats: Mutex::new(HashMap::new()),
            tick_count: AtomicU64::new(0),
            suspended: AtomicBool::new(false),
            profiling: AtomicBool::new(options.profiling),
            editor_mode: options.editor_mode,
        }
    }

    pub fn is_editor_mode(&self) -> bool {
        self.editor_mode
    }

    /// Bring up every resolved system in order.
    ///
    /// Per-system construction and initialization failures are recorded in
    /// the report, and systems depending on a failed one are skipped with
    /// [`SkipReason::DependencyFailed`]. Configuration errors abort startup.
    pub async fn start(
        &self,
        resolution: &Resolution,
        registry: &RwLock<Registry>,
    ) -> Result<StartupReport, KernelError> {
        let mut report = StartupReport {
            order: resolution.names().into_iter().map(str::to_string).collect(),
            skipped: resolution.skipped.clone(),
            ..Default::default()
        };
        let mut unavailable: HashSet<SystemKey> = HashSet::new();

        for descriptor in &resolution.order {
            let failed_dep = descriptor
                .dependencies()
                .iter()
                .find(|dep| unavailable.contains(*dep));
            if let Some(dep) = failed_dep {
                warn!(system = descriptor.name(), dependency = dep.short_name(), "Dependency failed, system skipped");
                report.skipped.push(SkippedSystem {
                    name: descriptor.name().to_string(),
                    reason: SkipReason::DependencyFailed(dep.short_name().to_string()),
                });
                unavailable.extend(provided_keys(descriptor));
                continue;
            }

            match self.bring_up(descriptor, registry).await? {
                BringUp::Active(_) => {
                    for contract in descriptor.contracts() {
                        unavailable.remove(&contract.key());
                    }
                    report.active.push(descriptor.name().to_string());
                }
                BringUp::Failed(failed) => {
                    unavailable.extend(provided_keys(descriptor));
                    report.failed.push(failed);
                }
            }
        }

        Ok(report)
    }

    /// Construct, inject, register and initialize one system.
    ///
    /// The initializer is awaited before this returns; no other system is
    /// brought up concurrently.
    pub async fn bring_up(
        &self,
        descriptor: &SystemDescriptor,
        registry: &RwLock<Registry>,
    ) -> Result<BringUp, KernelError> {
        let name = descriptor.name();

        let instance = match descriptor.construct() {
            Ok(instance) => instance,
            Err(e) => {
                error!(system = %name, error = %e, "System construction failed");
                return Ok(BringUp::Failed(FailedSystem {
                    name: name.to_string(),
                    error: e.to_string(),
                }));
            }
        };
        let system = instance.system.clone();

        let injections = {
            let registry = registry.read();
            injector::inject(name, descriptor.dependencies(), system.as_ref(), &registry)?
        };

        let id = {
            let mut registry = registry.write();
            let id = registry.register(descriptor, instance)?;
            if let Some(entry) = registry.entry_mut(id) {
                entry.state = LifecycleState::Injected;
                entry.injections = injections;
            }
            id
        };

        if !self.editor_mode {
            if let Some(hooks) = system.as_register_hooks() {
                hooks.on_register();
            }
        }

        set_state(registry, id, LifecycleState::Initializing);
        let started = Instant::now();
        info!(system = %name, "Initializing system");

        let result = if self.editor_mode {
            if let Some(editor) = system.as_editor_support() {
                editor.on_editor_initialize();
            }
            Ok(())
        } else {
            match system.as_initialize() {
                Some(init) => init.initialize().await,
                None => Ok(()),
            }
        };

        match result {
            Ok(()) => {
                let mut registry = registry.write();
                if let Some(entry) = registry.entry_mut(id) {
                    entry.state = LifecycleState::Active;
                    self.attach(entry);
                }
                info!(system = %name, elapsed_ms = started.elapsed().as_millis() as u64, "System active");
                Ok(BringUp::Active(id))
            }
            Err(e) => {
                set_state(registry, id, LifecycleState::Failed);
                error!(
                    system = %name,
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "System initialization failed, excluded from tick dispatch"
                );
                Ok(BringUp::Failed(FailedSystem {
                    name: name.to_string(),
                    error: e.to_string(),
                }))
            }
        }
    }

    /// Add an active instance to every slot it declares.
    pub(crate) fn attach(&self, entry: &SystemEntry) {
        let capabilities = entry.capabilities();
        let attached = Arc::new(Attached {
            id: entry.id(),
            name: entry.name(),
            priority: entry.priority(),
            update_interval: u64::from(entry.update_interval()),
            system: entry.system().clone(),
            last_update: AtomicU64::new(self.tick_count.load(Ordering::SeqCst)),
            live: AtomicBool::new(true),
        });

        let mut slots = self.slots.write();
        for slot in Slot::ALL {
            if !capabilities.contains(slot.capability()) {
                continue;
            }
            let list = &mut slots[slot.index()];
            let mut next: Vec<Arc<Attached>> = Vec::clone(list);
            let at = next.partition_point(|a| (a.priority, a.id) < (attached.priority, attached.id));
            next.insert(at, attached.clone());
            *list = Arc::new(next);
        }
        if self.profiling.load(Ordering::Relaxed) && capabilities.contains(Capability::Update) {
            self.stats.lock().entry(entry.id()).or_default();
        }
        debug!(system = entry.name(), %capabilities, "Attached to tick slots");
    }

    /// Remove an instance from every slot. Returns whether it was attached.
    pub fn detach(&self, id: SystemId) -> bool {
        let mut found = false;
        let mut slots = self.slots.write();
        for list in slots.iter_mut() {
            let Some(attached) = list.iter().find(|a| a.id == id).cloned() else {
                continue;
            };
            attached.live.store(false, Ordering::SeqCst);
            found = true;
            let next: Vec<Arc<Attached>> = list.iter().filter(|a| a.id != id).cloned().collect();
            *list = Arc::new(next);
        }
        drop(slots);
        self.stats.lock().remove(&id);
        found
    }

    /// Detach, run the unregister hook, mark destroyed and remove from the
    /// registry.
    pub fn unregister(&self, id: SystemId, registry: &RwLock<Registry>) -> Option<SystemEntry> {
        self.detach(id);
        let system = registry.read().entry(id).map(|entry| entry.system().clone())?;
        if let Some(hooks) = system.as_register_hooks() {
            hooks.on_unregister();
        }
        let mut entry = registry.write().remove(id)?;
        entry.state = LifecycleState::Destroyed;
        info!(system = entry.name(), "System unregistered");
        Some(entry)
    }

    /// Unregister everything, last registered first.
    pub fn teardown(&self, registry: &RwLock<Registry>) -> Vec<SystemEntry> {
        let ids = registry.read().ids();
        let destroyed: Vec<SystemEntry> = ids
            .into_iter()
            .rev()
            .filter_map(|id| self.unregister(id, registry))
            .collect();
        info!(count = destroyed.len(), "Teardown complete");
        destroyed
    }

    fn list(&self, slot: Slot) -> SlotList {
        self.slots.read()[slot.index()].clone()
    }

    /// Systems attached to `slot`, in invocation order.
    pub fn slot_order(&self, slot: Slot) -> Vec<&'static str> {
        self.list(slot).iter().map(|a| a.name).collect()
    }

    /// Regular update slot.
    pub fn tick(&self, delta: f32) {
        if self.is_suspended() {
            return;
        }
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst) + 1;
        let delta = delta.max(0.0);
        let profiling = self.profiling.load(Ordering::Relaxed);

        for attached in self.list(Slot::Update).iter() {
            if !attached.live.load(Ordering::SeqCst) || !attached.is_enabled() || !attached.is_due(tick) {
                continue;
            }
            let Some(update) = attached.system.as_update() else {
                continue;
            };
            if profiling {
                let started = Instant::now();
                update.on_update(delta);
                self.stats
                    .lock()
                    .entry(attached.id)
                    .or_default()
                    .record(started.elapsed());
            } else {
                update.on_update(delta);
            }
        }
    }

    /// Late update slot; the host calls it after [`tick`](Self::tick).
    pub fn late_tick(&self, delta: f32) {
        if self.is_suspended() {
            return;
        }
        let delta = delta.max(0.0);
        self.each(Slot::LateUpdate, true, |system| {
            if let Some(late) = system.as_late_update() {
                late.on_late_update(delta);
            }
        });
    }

    /// Fixed-interval slot.
    pub fn fixed_tick(&self, delta: f32) {
        if self.is_suspended() {
            return;
        }
        let delta = delta.max(0.0);
        self.each(Slot::FixedUpdate, true, |system| {
            if let Some(fixed) = system.as_fixed_update() {
                fixed.on_fixed_update(delta);
            }
        });
    }

    pub fn pause(&self, paused: bool) {
        self.each(Slot::Pause, false, |system| {
            if let Some(aware) = system.as_pause_aware() {
                aware.on_pause(paused);
            }
        });
    }

    pub fn focus(&self, focused: bool) {
        self.each(Slot::Focus, false, |system| {
            if let Some(aware) = system.as_focus_aware() {
                aware.on_focus_changed(focused);
            }
        });
    }

    pub fn quit(&self) {
        self.each(Slot::Quit, false, |system| {
            if let Some(aware) = system.as_quit_aware() {
                aware.on_quit();
            }
        });
    }

    fn each(&self, slot: Slot, check_enabled: bool, call: impl Fn(&dyn System)) {
        for attached in self.list(slot).iter() {
            if !attached.live.load(Ordering::SeqCst) {
                continue;
            }
            if check_enabled && !attached.is_enabled() {
                continue;
            }
            call(attached.system.as_ref());
        }
    }

    /// Stop invoking tick slots until [`resume`](Self::resume).
    pub fn suspend(&self) {
        if !self.suspended.swap(true, Ordering::SeqCst) {
            info!("Tick dispatch suspended");
        }
    }

    pub fn resume(&self) {
        if self.suspended.swap(false, Ordering::SeqCst) {
            info!("Tick dispatch resumed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    /// Update ticks dispatched so far.
    pub fn tick_count(&self) -> u64 {
        self.tick_count.load(Ordering::SeqCst)
    }

    pub fn set_profiling(&self, enabled: bool) {
        if !enabled {
            self.stats.lock().clear();
        }
        self.profiling.store(enabled, Ordering::Relaxed);
    }

    pub fn is_profiling(&self) -> bool {
        self.profiling.load(Ordering::Relaxed)
    }

    pub fn stats(&self, id: SystemId) -> Option<UpdateStats> {
        self.stats.lock().get(&id).cloned()
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherOptions::default())
    }
}

fn set_state(registry: &RwLock<Registry>, id: SystemId, state: LifecycleState) {
    match registry.write().entry_mut(id) {
        Some(entry) => entry.state = state,
        None => warn!(%id, %state, "State change for a system that is no longer registered"),
    }
}
