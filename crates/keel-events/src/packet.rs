//! Dispatch packets and publish results.

use std::any::{Any, TypeId};
use std::fmt;

/// A payload in flight through the interceptor chain.
///
/// Global interceptors see this erased form; typed interceptors see a
/// [`TypedPacket`] view of the same packet.
pub struct EventPacket {
    type_id: TypeId,
    event_type: &'static str,
    payload: Box<dyn Any + Send + Sync>,
    sender: Option<String>,
}

impl EventPacket {
    pub(crate) fn new<E: Send + Sync + 'static>(payload: E, sender: Option<String>) -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            event_type: std::any::type_name::<E>(),
            payload: Box::new(payload),
            sender,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Fully qualified payload type name.
    pub fn event_type(&self) -> &'static str {
        self.event_type
    }

    pub fn is<E: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<E>()
    }

    pub fn payload<E: 'static>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    pub fn payload_mut<E: 'static>(&mut self) -> Option<&mut E> {
        self.payload.downcast_mut::<E>()
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn set_sender(&mut self, sender: Option<String>) {
        self.sender = sender;
    }

    pub(crate) fn typed<E: 'static>(&mut self) -> Option<TypedPacket<'_, E>> {
        let payload = self.payload.downcast_mut::<E>()?;
        Some(TypedPacket {
            payload,
            sender: &mut self.sender,
        })
    }

    pub(crate) fn into_parts(self) -> (Box<dyn Any + Send + Sync>, Option<String>) {
        (self.payload, self.sender)
    }
}

impl fmt::Debug for EventPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPacket")
            .field("event_type", &self.event_type)
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

/// Typed, mutable view of a packet handed to typed interceptors.
pub struct TypedPacket<'a, E> {
    pub payload: &'a mut E,
    pub sender: &'a mut Option<String>,
}

/// What happened to a single publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Passed the interceptor chain. `handlers` counts invoked subscribers,
    /// `failures` those that returned an error (or could not be scheduled).
    Delivered { handlers: usize, failures: usize },
    /// An interceptor aborted delivery.
    Aborted,
    /// Issued while the bus was dispatching; delivered once the current
    /// dispatch finishes.
    Queued,
}

impl PublishOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, PublishOutcome::Delivered { .. })
    }

    pub fn handlers(&self) -> usize {
        match self {
            PublishOutcome::Delivered { handlers, .. } => *handlers,
            _ => 0,
        }
    }

    pub fn failures(&self) -> usize {
        match self {
            PublishOutcome::Delivered { failures, .. } => *failures,
            _ => 0,
        }
    }
}
