//! Registration handles and owner-scoped cleanup.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::bus::BusInner;

/// Something the bus can release on request.
pub trait Registration: Send + Sync {
    /// Remove the registration from its bus. Returns `false` when it was
    /// already gone.
    fn release(&self) -> bool;

    fn is_active(&self) -> bool;
}

/// Handle to one subscriber binding.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    type_id: TypeId,
    event_type: &'static str,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        type_id: TypeId,
        event_type: &'static str,
        active: Arc<AtomicBool>,
        bus: Weak<BusInner>,
    ) -> Self {
        Self {
            id,
            type_id,
            event_type,
            active,
            bus,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove the subscriber. Safe to call any number of times.
    pub fn unsubscribe(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_handler(self.type_id, self.id);
        }
        was_active
    }

    /// Run this handler once right now with `E::default()`.
    ///
    /// Interceptors and the publish queue are bypassed, so this also works
    /// from inside another handler. A once handler is consumed. Returns
    /// `false` when `E` is not this subscription's event type or the handler
    /// is no longer subscribed.
    pub fn invoke_now<E: Default + Send + Sync + 'static>(&self) -> bool {
        if TypeId::of::<E>() != self.type_id || !self.is_active() {
            return false;
        }
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let payload: Arc<dyn Any + Send + Sync> = Arc::new(E::default());
        bus.invoke_handler(self.type_id, self.id, self.event_type, payload)
    }

    /// Tie this subscription to `collector`'s lifetime.
    pub fn add_to(self, collector: &EventCollector) {
        collector.add(self);
    }
}

impl Registration for Subscription {
    fn release(&self) -> bool {
        self.unsubscribe()
    }

    fn is_active(&self) -> bool {
        Subscription::is_active(self)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("event_type", &self.event_type)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Handle to one interceptor, typed or global.
#[derive(Clone)]
pub struct InterceptorHandle {
    id: u64,
    channel: Option<TypeId>,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl InterceptorHandle {
    pub(crate) fn new(
        id: u64,
        channel: Option<TypeId>,
        active: Arc<AtomicBool>,
        bus: Weak<BusInner>,
    ) -> Self {
        Self {
            id,
            channel,
            active,
            bus,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether this interceptor sees every event type.
    pub fn is_global(&self) -> bool {
        self.channel.is_none()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Remove the interceptor. Safe to call any number of times.
    pub fn remove(&self) -> bool {
        let was_active = self.active.swap(false, Ordering::SeqCst);
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_interceptor(self.channel, self.id);
        }
        was_active
    }

    pub fn add_to(self, collector: &EventCollector) {
        collector.add(self);
    }
}

impl Registration for InterceptorHandle {
    fn release(&self) -> bool {
        self.remove()
    }

    fn is_active(&self) -> bool {
        InterceptorHandle::is_active(self)
    }
}

impl fmt::Debug for InterceptorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorHandle")
            .field("id", &self.id)
            .field("global", &self.is_global())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Owns registrations on behalf of an external object.
///
/// Embed one in the owner; when the owner is dropped (or calls
/// [`dispose`](Self::dispose)) every registration it holds is released
/// exactly once. Further disposals are no-ops.
#[derive(Default)]
pub struct EventCollector {
    items: Mutex<Vec<Box<dyn Registration>>>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `registration`. Registrations released elsewhere in the
    /// meantime are dropped here, so a long-lived collector only keeps
    /// live ones.
    pub fn add<R: Registration + 'static>(&self, registration: R) {
        let mut items = self.items.lock();
        items.retain(|item| item.is_active());
        items.push(Box::new(registration));
    }

    /// Number of held registrations that are still live.
    pub fn len(&self) -> usize {
        self.items.lock().iter().filter(|r| r.is_active()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release everything collected so far. Returns how many registrations
    /// were still live.
    pub fn dispose(&self) -> usize {
        let items = std::mem::take(&mut *self.items.lock());
        let released = items.iter().filter(|r| r.release()).count();
        if released > 0 {
            debug!(released, "Event collector disposed");
        }
        released
    }
}

impl Drop for EventCollector {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for EventCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventCollector")
            .field("live", &self.len())
            .finish()
    }
}
