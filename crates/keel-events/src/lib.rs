//! # keel Events
//!
//! A typed publish/subscribe bus keyed by payload type.
//!
//! ## Dispatch
//!
//! Every publish builds an [`EventPacket`] and walks the interceptor chain
//! for its payload type merged with the global chain, in ascending priority.
//! Interceptors may rewrite the packet, skip the rest of the chain, or abort
//! delivery. Surviving packets reach subscribers in subscription order.
//!
//! ## Scoped cleanup
//!
//! A [`Subscription`] or [`InterceptorHandle`] added to an [`EventCollector`]
//! is released when the collector is disposed or dropped.

mod bus;
mod handler;
mod packet;
mod subscription;

pub use bus::EventBus;
pub use handler::Intercept;
pub use packet::{EventPacket, PublishOutcome, TypedPacket};
pub use subscription::{EventCollector, InterceptorHandle, Registration, Subscription};
