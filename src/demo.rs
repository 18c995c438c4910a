//! Demo systems driven by the reference host.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use keel_core::{SystemDescriptor, SystemEnabledChanged};
use keel_events::{EventBus, EventCollector};
use keel_protocols::{
    Dependencies, EditorSupport, EnabledFlag, FixedUpdate, FocusAware, InitializeAsync, Inject,
    LateUpdate, PauseAware, QuitAware, RegisterHooks, System, SystemError, Toggle, Update,
};

/// Ticks between two simulated key presses.
const PRESS_EVERY: u64 = 30;

/// Published by [`Input`] for every simulated key press.
#[derive(Debug, Clone)]
pub struct KeyPressed {
    pub frame: u64,
}

/// Every demo system, in no particular order.
pub fn descriptors() -> Vec<SystemDescriptor> {
    vec![
        SystemDescriptor::default_of::<Score>().auto_register(),
        SystemDescriptor::default_of::<Audio>()
            .depends_on::<Clock>()
            .with_alias("audio")
            .with_priority(10)
            .auto_register(),
        SystemDescriptor::default_of::<Input>().with_priority(-5).auto_register(),
        SystemDescriptor::default_of::<Clock>().with_priority(-10).auto_register(),
    ]
}

/// Tracks elapsed time and fixed steps.
#[derive(Default)]
pub struct Clock {
    frames: AtomicU64,
    fixed_steps: AtomicU64,
    elapsed: Mutex<f64>,
}

impl Clock {
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    pub fn fixed_steps(&self) -> u64 {
        self.fixed_steps.load(Ordering::SeqCst)
    }

    /// Seconds of variable-rate time seen so far.
    pub fn elapsed(&self) -> f64 {
        *self.elapsed.lock()
    }
}

impl Update for Clock {
    fn on_update(&self, delta: f32) {
        self.frames.fetch_add(1, Ordering::SeqCst);
        *self.elapsed.lock() += f64::from(delta);
    }
}

impl FixedUpdate for Clock {
    fn on_fixed_update(&self, _delta: f32) {
        self.fixed_steps.fetch_add(1, Ordering::SeqCst);
    }
}

impl System for Clock {
    fn as_update(&self) -> Option<&dyn Update> {
        Some(self)
    }

    fn as_fixed_update(&self) -> Option<&dyn FixedUpdate> {
        Some(self)
    }
}

/// Simulates key presses while focused and not paused.
#[derive(Default)]
pub struct Input {
    bus: Inject<EventBus>,
    enabled: EnabledFlag,
    paused: AtomicBool,
    unfocused: AtomicBool,
    frame: AtomicU64,
}

impl Input {
    fn is_listening(&self) -> bool {
        !self.paused.load(Ordering::SeqCst) && !self.unfocused.load(Ordering::SeqCst)
    }
}

impl Update for Input {
    fn on_update(&self, _delta: f32) {
        let frame = self.frame.fetch_add(1, Ordering::SeqCst) + 1;
        if frame % PRESS_EVERY != 0 || !self.is_listening() {
            return;
        }
        if let Some(bus) = self.bus.get() {
            bus.publish_from("Input", KeyPressed { frame });
        }
    }
}

impl Toggle for Input {
    fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.set(enabled);
    }
}

impl PauseAware for Input {
    fn on_pause(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

impl FocusAware for Input {
    fn on_focus_changed(&self, focused: bool) {
        self.unfocused.store(!focused, Ordering::SeqCst);
    }
}

impl System for Input {
    fn inject(&self, deps: &mut Dependencies<'_>) {
        deps.bind(&self.bus);
    }

    fn as_update(&self) -> Option<&dyn Update> {
        Some(self)
    }

    fn as_toggle(&self) -> Option<&dyn Toggle> {
        Some(self)
    }

    fn as_pause_aware(&self) -> Option<&dyn PauseAware> {
        Some(self)
    }

    fn as_focus_aware(&self) -> Option<&dyn FocusAware> {
        Some(self)
    }
}

/// Loads its banks asynchronously and follows the clock.
#[derive(Default)]
pub struct Audio {
    clock: Inject<Clock>,
    loaded: AtomicBool,
    last_heard: AtomicU64,
}

impl Audio {
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Clock frame seen by the last late update.
    pub fn last_heard(&self) -> u64 {
        self.last_heard.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InitializeAsync for Audio {
    async fn initialize(&self) -> Result<(), SystemError> {
        if !self.clock.is_bound() {
            return Err(SystemError::InitializationFailed("clock not bound".to_string()));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.loaded.store(true, Ordering::SeqCst);
        info!("Audio banks loaded");
        Ok(())
    }
}

impl EditorSupport for Audio {
    fn on_editor_initialize(&self) {
        self.loaded.store(true, Ordering::SeqCst);
    }
}

impl LateUpdate for Audio {
    fn on_late_update(&self, _delta: f32) {
        if let Some(clock) = self.clock.get() {
            self.last_heard.store(clock.frames(), Ordering::SeqCst);
        }
    }
}

impl System for Audio {
    fn inject(&self, deps: &mut Dependencies<'_>) {
        deps.bind(&self.clock);
    }

    fn as_initialize(&self) -> Option<&dyn InitializeAsync> {
        Some(self)
    }

    fn as_editor_support(&self) -> Option<&dyn EditorSupport> {
        Some(self)
    }

    fn as_late_update(&self) -> Option<&dyn LateUpdate> {
        Some(self)
    }
}

/// Counts key presses and reports the total on quit.
#[derive(Default)]
pub struct Score {
    bus: Inject<EventBus>,
    presses: Arc<AtomicU32>,
    events: EventCollector,
}

impl Score {
    pub fn presses(&self) -> u32 {
        self.presses.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InitializeAsync for Score {
    async fn initialize(&self) -> Result<(), SystemError> {
        let bus = self
            .bus
            .get()
            .ok_or_else(|| SystemError::InitializationFailed("event bus not bound".to_string()))?;

        let presses = self.presses.clone();
        bus.subscribe_with_sender(move |event: &KeyPressed, sender| {
            presses.fetch_add(1, Ordering::SeqCst);
            debug!(frame = event.frame, sender = sender.unwrap_or("-"), "Key pressed");
            Ok(())
        })
        .add_to(&self.events);

        bus.subscribe(|event: &SystemEnabledChanged| {
            info!(system = %event.name, enabled = event.enabled, "System toggled");
            Ok(())
        })
        .add_to(&self.events);

        Ok(())
    }
}

impl RegisterHooks for Score {
    fn on_unregister(&self) {
        self.events.dispose();
    }
}

impl QuitAware for Score {
    fn on_quit(&self) {
        info!(presses = self.presses(), "Final score");
    }
}

impl System for Score {
    fn inject(&self, deps: &mut Dependencies<'_>) {
        deps.bind(&self.bus);
    }

    fn as_initialize(&self) -> Option<&dyn InitializeAsync> {
        Some(self)
    }

    fn as_register_hooks(&self) -> Option<&dyn RegisterHooks> {
        Some(self)
    }

    fn as_quit_aware(&self) -> Option<&dyn QuitAware> {
        Some(self)
    }
}
