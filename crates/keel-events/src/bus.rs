//! The event bus.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use keel_protocols::System;

use crate::handler::{Handler, HandlerEntry, Intercept, InterceptFn, InterceptorEntry, merge_chains};
use crate::packet::{EventPacket, PublishOutcome, TypedPacket};
use crate::subscription::{InterceptorHandle, Subscription};

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;

#[derive(Default)]
struct BusState {
    channels: HashMap<TypeId, Vec<HandlerEntry>>,
    interceptors: HashMap<TypeId, Vec<InterceptorEntry>>,
    global: Vec<InterceptorEntry>,
    dispatching: bool,
    queue: VecDeque<EventPacket>,
}

pub(crate) struct BusInner {
    state: Mutex<BusState>,
    next_id: AtomicU64,
}

impl BusInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn remove_handler(&self, type_id: TypeId, id: u64) {
        let mut state = self.state.lock();
        if let Some(list) = state.channels.get_mut(&type_id) {
            list.retain(|entry| entry.id != id);
            if list.is_empty() {
                state.channels.remove(&type_id);
            }
        }
    }

    /// Run one handler with `payload` right away, outside any dispatch.
    /// Returns `false` when the handler is gone or already consumed.
    pub(crate) fn invoke_handler(
        &self,
        type_id: TypeId,
        id: u64,
        event_type: &'static str,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> bool {
        let entry = self
            .state
            .lock()
            .channels
            .get(&type_id)
            .and_then(|list| list.iter().find(|entry| entry.id == id).cloned());
        let Some(entry) = entry else {
            return false;
        };
        if !entry.claim() {
            return false;
        }
        if entry.once {
            self.remove_handler(type_id, id);
        }

        match &entry.handler {
            Handler::Sync(handler) => {
                if let Err(e) = handler(&*payload, None) {
                    error!(event = event_type, handler = id, error = %e, "Event handler failed");
                }
            }
            Handler::Async(handler) => {
                spawn_pending(event_type, vec![handler(payload)]);
            }
        }
        debug!(event = event_type, handler = id, "Handler invoked directly");
        true
    }

    pub(crate) fn remove_interceptor(&self, channel: Option<TypeId>, id: u64) {
        let mut state = self.state.lock();
        match channel {
            Some(type_id) => {
                if let Some(list) = state.interceptors.get_mut(&type_id) {
                    list.retain(|entry| entry.id != id);
                    if list.is_empty() {
                        state.interceptors.remove(&type_id);
                    }
                }
            }
            None => state.global.retain(|entry| entry.id != id),
        }
    }
}

/// Clears the dispatching flag if a dispatch unwinds before finishing.
struct DispatchGuard<'a> {
    inner: &'a BusInner,
    armed: bool,
}

impl<'a> DispatchGuard<'a> {
    fn new(inner: &'a BusInner) -> Self {
        Self { inner, armed: true }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.state.lock().dispatching = false;
        }
    }
}

struct Delivery {
    event_type: &'static str,
    outcome: PublishOutcome,
    pending: Vec<BoxFuture<'static, anyhow::Result<()>>>,
}

/// Typed publish/subscribe bus.
///
/// Cheap to clone; clones share the same subscriber tables. The bus is meant
/// to be driven from one logical thread: a publish issued while another is
/// being dispatched is queued and delivered after it, in FIFO order.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                state: Mutex::new(BusState::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe a synchronous handler to events of type `E`.
    pub fn subscribe<E, F>(&self, handler: F) -> Subscription
    where
        E: Send + Sync + 'static,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.subscribe_with_sender(move |event: &E, _sender: Option<&str>| handler(event))
    }

    /// Subscribe a synchronous handler that also receives the sender label.
    pub fn subscribe_with_sender<E, F>(&self, handler: F) -> Subscription
    where
        E: Send + Sync + 'static,
        F: Fn(&E, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler::<E>(erase_sync(handler), false)
    }

    /// Subscribe a handler that is removed after its first invocation,
    /// whether it succeeds or not.
    pub fn subscribe_once<E, F>(&self, handler: F) -> Subscription
    where
        E: Send + Sync + 'static,
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler = move |event: &E, _sender: Option<&str>| handler(event);
        self.add_handler::<E>(erase_sync(handler), true)
    }

    /// Subscribe an asynchronous handler.
    ///
    /// [`publish`](Self::publish) spawns it on the current tokio runtime and
    /// returns immediately; [`publish_async`](Self::publish_async) awaits it.
    pub fn subscribe_async<E, F, Fut>(&self, handler: F) -> Subscription
    where
        E: Send + Sync + 'static,
        F: Fn(Arc<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let erased = move |payload: Arc<dyn Any + Send + Sync>| -> BoxFuture<'static, anyhow::Result<()>> {
            match payload.downcast::<E>() {
                Ok(event) => handler(event).boxed(),
                Err(_) => futures::future::ready(Ok(())).boxed(),
            }
        };
        self.add_handler::<E>(Handler::Async(Arc::new(erased)), false)
    }

    fn add_handler<E: 'static>(&self, handler: Handler, once: bool) -> Subscription {
        let id = self.inner.next_id();
        let active = Arc::new(AtomicBool::new(true));
        let entry = HandlerEntry {
            id,
            handler,
            once,
            active: active.clone(),
        };

        self.inner
            .state
            .lock()
            .channels
            .entry(TypeId::of::<E>())
            .or_default()
            .push(entry);
        debug!(event = type_name::<E>(), id, once, "Handler subscribed");

        Subscription::new(
            id,
            TypeId::of::<E>(),
            type_name::<E>(),
            active,
            Arc::downgrade(&self.inner),
        )
    }

    /// Add an interceptor for events of type `E`. Lower priorities run first.
    pub fn add_interceptor<E, F>(&self, priority: i32, interceptor: F) -> InterceptorHandle
    where
        E: Send + Sync + 'static,
        F: Fn(&mut TypedPacket<'_, E>) -> anyhow::Result<Intercept> + Send + Sync + 'static,
    {
        let erased = move |packet: &mut EventPacket| -> anyhow::Result<Intercept> {
            match packet.typed::<E>() {
                Some(mut view) => interceptor(&mut view),
                None => Ok(Intercept::Continue),
            }
        };
        self.add_interceptor_entry(Some(TypeId::of::<E>()), priority, Arc::new(erased))
    }

    /// Add an interceptor that sees every event type.
    pub fn add_global_interceptor<F>(&self, priority: i32, interceptor: F) -> InterceptorHandle
    where
        F: Fn(&mut EventPacket) -> anyhow::Result<Intercept> + Send + Sync + 'static,
    {
        self.add_interceptor_entry(None, priority, Arc::new(interceptor))
    }

    fn add_interceptor_entry(
        &self,
        channel: Option<TypeId>,
        priority: i32,
        intercept: Arc<InterceptFn>,
    ) -> InterceptorHandle {
        let id = self.inner.next_id();
        let active = Arc::new(AtomicBool::new(true));
        let entry = InterceptorEntry {
            id,
            priority,
            intercept,
            active: active.clone(),
        };

        {
            let mut state = self.inner.state.lock();
            match channel {
                Some(type_id) => state.interceptors.entry(type_id).or_default().push(entry),
                None => state.global.push(entry),
            }
        }
        debug!(id, priority, global = channel.is_none(), "Interceptor added");

        InterceptorHandle::new(id, channel, active, Arc::downgrade(&self.inner))
    }

    /// Publish an event with no sender.
    pub fn publish<E: Send + Sync + 'static>(&self, event: E) -> PublishOutcome {
        self.publish_packet(EventPacket::new(event, None))
    }

    /// Publish an event labelled with its sender.
    pub fn publish_from<E: Send + Sync + 'static>(
        &self,
        sender: impl Into<String>,
        event: E,
    ) -> PublishOutcome {
        self.publish_packet(EventPacket::new(event, Some(sender.into())))
    }

    /// Publish `E::default()`.
    pub fn publish_default<E: Default + Send + Sync + 'static>(&self) -> PublishOutcome {
        self.publish(E::default())
    }

    /// Publish and wait for every asynchronous handler to finish.
    ///
    /// Failures of asynchronous handlers are counted in the outcome. Called
    /// while the bus is already dispatching, the event is queued like any
    /// other re-entrant publish and this returns [`PublishOutcome::Queued`].
    ///
    /// The bus stops dispatching once the synchronous handlers have run, so
    /// other publishes are delivered normally while this awaits.
    pub async fn publish_async<E: Send + Sync + 'static>(&self, event: E) -> PublishOutcome {
        let Some(packet) = self.begin_dispatch(EventPacket::new(event, None)) else {
            return PublishOutcome::Queued;
        };
        let guard = DispatchGuard::new(&self.inner);

        let delivery = self.deliver(packet);
        self.drain_queue(guard);
        let async_failures = join_pending(delivery.event_type, delivery.pending).await;

        match delivery.outcome {
            PublishOutcome::Delivered { handlers, failures } => PublishOutcome::Delivered {
                handlers,
                failures: failures + async_failures,
            },
            other => other,
        }
    }

    fn publish_packet(&self, packet: EventPacket) -> PublishOutcome {
        let Some(packet) = self.begin_dispatch(packet) else {
            return PublishOutcome::Queued;
        };
        let guard = DispatchGuard::new(&self.inner);

        let delivery = self.deliver(packet);
        let spawn_failures = spawn_pending(delivery.event_type, delivery.pending);
        self.drain_queue(guard);

        match delivery.outcome {
            PublishOutcome::Delivered { handlers, failures } => PublishOutcome::Delivered {
                handlers,
                failures: failures + spawn_failures,
            },
            other => other,
        }
    }

    /// Mark the bus as dispatching, or queue the packet if it already is.
    fn begin_dispatch(&self, packet: EventPacket) -> Option<EventPacket> {
        let mut state = self.inner.state.lock();
        if state.dispatching {
            debug!(event = packet.event_type(), "Publish queued during dispatch");
            state.queue.push_back(packet);
            return None;
        }
        state.dispatching = true;
        Some(packet)
    }

    fn drain_queue(&self, mut guard: DispatchGuard<'_>) {
        loop {
            let next = {
                let mut state = self.inner.state.lock();
                match state.queue.pop_front() {
                    Some(packet) => packet,
                    None => {
                        state.dispatching = false;
                        guard.armed = false;
                        return;
                    }
                }
            };
            let delivery = self.deliver(next);
            spawn_pending(delivery.event_type, delivery.pending);
            debug!(event = delivery.event_type, outcome = ?delivery.outcome, "Queued publish delivered");
        }
    }

    /// Run the interceptor chain and the synchronous handlers for one packet.
    /// Asynchronous handler futures are returned unstarted.
    fn deliver(&self, mut packet: EventPacket) -> Delivery {
        let event_type = packet.event_type();
        let type_id = packet.type_id();

        let (chain, handlers) = {
            let state = self.inner.state.lock();
            let typed = state
                .interceptors
                .get(&type_id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let chain = merge_chains(typed, &state.global);
            let handlers = state.channels.get(&type_id).cloned().unwrap_or_default();
            (chain, handlers)
        };

        for entry in chain.iter().filter(|entry| entry.is_active()) {
            match (entry.intercept)(&mut packet) {
                Ok(Intercept::Continue) => {}
                Ok(Intercept::StopChain) => {
                    debug!(event = event_type, interceptor = entry.id, "Interceptor chain stopped");
                    break;
                }
                Ok(Intercept::Abort) => {
                    debug!(event = event_type, interceptor = entry.id, "Publish aborted by interceptor");
                    return Delivery::aborted(event_type);
                }
                Err(e) => {
                    error!(event = event_type, interceptor = entry.id, error = %e, "Interceptor failed, publish aborted");
                    return Delivery::aborted(event_type);
                }
            }
        }

        let (payload, sender) = packet.into_parts();
        let payload: Arc<dyn Any + Send + Sync> = Arc::from(payload);

        let mut invoked = 0;
        let mut failures = 0;
        let mut pending = Vec::new();
        let mut consumed = Vec::new();

        for entry in &handlers {
            if !entry.claim() {
                continue;
            }
            if entry.once {
                consumed.push(entry.id);
            }
            invoked += 1;

            match &entry.handler {
                Handler::Sync(handler) => {
                    if let Err(e) = handler(&*payload, sender.as_deref()) {
                        failures += 1;
                        error!(event = event_type, handler = entry.id, error = %e, "Event handler failed");
                    }
                }
                Handler::Async(handler) => pending.push(handler(payload.clone())),
            }
        }

        if !consumed.is_empty() {
            let mut state = self.inner.state.lock();
            if let Some(list) = state.channels.get_mut(&type_id) {
                list.retain(|entry| !consumed.contains(&entry.id));
                if list.is_empty() {
                    state.channels.remove(&type_id);
                }
            }
        }

        Delivery {
            event_type,
            outcome: PublishOutcome::Delivered {
                handlers: invoked,
                failures,
            },
            pending,
        }
    }

    /// Drop every subscription and interceptor, including queued publishes.
    /// Outstanding handles report themselves inactive.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        let handlers = state.channels.values().flatten().map(|e| &e.active);
        let interceptors = state
            .interceptors
            .values()
            .flatten()
            .chain(state.global.iter())
            .map(|e| &e.active);
        for active in handlers.chain(interceptors) {
            active.store(false, Ordering::SeqCst);
        }

        state.channels.clear();
        state.interceptors.clear();
        state.global.clear();
        state.queue.clear();
        info!("Event bus reset");
    }

    /// Number of live subscribers for `E`.
    pub fn subscriber_count<E: 'static>(&self) -> usize {
        self.inner
            .state
            .lock()
            .channels
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    pub fn has_subscribers<E: 'static>(&self) -> bool {
        self.subscriber_count::<E>() > 0
    }

    /// Number of typed interceptors for `E` (global ones excluded).
    pub fn interceptor_count<E: 'static>(&self) -> usize {
        self.inner
            .state
            .lock()
            .interceptors
            .get(&TypeId::of::<E>())
            .map_or(0, Vec::len)
    }

    pub fn global_interceptor_count(&self) -> usize {
        self.inner.state.lock().global.len()
    }

    /// Publishes waiting behind the current dispatch.
    pub fn queued(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl Delivery {
    fn aborted(event_type: &'static str) -> Self {
        Self {
            event_type,
            outcome: PublishOutcome::Aborted,
            pending: Vec::new(),
        }
    }
}

fn erase_sync<E, F>(handler: F) -> Handler
where
    E: Send + Sync + 'static,
    F: Fn(&E, Option<&str>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    let erased = move |payload: &(dyn Any + Send + Sync), sender: Option<&str>| -> anyhow::Result<()> {
        match payload.downcast_ref::<E>() {
            Some(event) => handler(event, sender),
            None => Ok(()),
        }
    };
    Handler::Sync(Arc::new(erased))
}

/// Spawn asynchronous handlers on the current runtime. Returns how many
/// could not be scheduled.
fn spawn_pending(event_type: &'static str, pending: Vec<BoxFuture<'static, anyhow::Result<()>>>) -> usize {
    if pending.is_empty() {
        return 0;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            for future in pending {
                handle.spawn(async move {
                    if let Err(e) = future.await {
                        error!(event = event_type, error = %e, "Async event handler failed");
                    }
                });
            }
            0
        }
        Err(_) => {
            error!(
                event = event_type,
                count = pending.len(),
                "No async runtime available, async handlers dropped"
            );
            pending.len()
        }
    }
}

/// Await asynchronous handlers. Returns how many failed.
async fn join_pending(
    event_type: &'static str,
    pending: Vec<BoxFuture<'static, anyhow::Result<()>>>,
) -> usize {
    let results = join_all(pending).await;
    results
        .into_iter()
        .filter_map(Result::err)
        .inspect(|e| error!(event = event_type, error = %e, "Async event handler failed"))
        .count()
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("EventBus")
            .field("channels", &state.channels.len())
            .field("interceptors", &(state.interceptors.values().map(Vec::len).sum::<usize>() + state.global.len()))
            .field("dispatching", &state.dispatching)
            .finish()
    }
}

/// The bus can be registered with the kernel and injected like any system.
impl System for EventBus {}
