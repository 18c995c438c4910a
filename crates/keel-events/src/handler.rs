//! Type-erased handler and interceptor entries.

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::BoxFuture;

use crate::packet::EventPacket;

/// Decision returned by an interceptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intercept {
    /// Hand the packet to the next interceptor.
    Continue,
    /// Skip the remaining interceptors but still deliver to subscribers.
    StopChain,
    /// Stop the chain and deliver to nobody.
    Abort,
}

pub(crate) type SyncFn =
    dyn Fn(&(dyn Any + Send + Sync), Option<&str>) -> anyhow::Result<()> + Send + Sync;

pub(crate) type AsyncFn =
    dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

pub(crate) type InterceptFn = dyn Fn(&mut EventPacket) -> anyhow::Result<Intercept> + Send + Sync;

#[derive(Clone)]
pub(crate) enum Handler {
    Sync(Arc<SyncFn>),
    Async(Arc<AsyncFn>),
}

/// One subscriber on a channel.
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub id: u64,
    pub handler: Handler,
    pub once: bool,
    pub active: Arc<AtomicBool>,
}

impl HandlerEntry {
    /// Claim the entry for one invocation. Once-entries can only be claimed
    /// a single time.
    pub fn claim(&self) -> bool {
        if self.once {
            self.active.swap(false, Ordering::SeqCst)
        } else {
            self.active.load(Ordering::SeqCst)
        }
    }
}

/// One interceptor, typed or global.
#[derive(Clone)]
pub(crate) struct InterceptorEntry {
    pub id: u64,
    pub priority: i32,
    pub intercept: Arc<InterceptFn>,
    pub active: Arc<AtomicBool>,
}

impl InterceptorEntry {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Merge a typed chain with the global chain in ascending priority; equal
/// priorities keep registration order across both chains.
pub(crate) fn merge_chains(
    typed: &[InterceptorEntry],
    global: &[InterceptorEntry],
) -> Vec<InterceptorEntry> {
    let mut chain: Vec<InterceptorEntry> = typed.iter().chain(global).cloned().collect();
    chain.sort_by_key(|entry| (entry.priority, entry.id));
    chain
}
