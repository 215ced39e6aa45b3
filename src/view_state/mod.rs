//! The topology view state machine and the narrow interfaces of its
//! external collaborators.
//!
//! [`ViewStateManager`] decides which [`TopologyEvent`] each bound
//! [`TopologyEventListener`] receives and hands the events to a background
//! sender. A [`ConsistencyService`] may gate the finalization of a change, and
//! a [`DiscoverySource`] plus a [`Scheduler`] drive the optional minimum
//! event delay.

mod async_event_sender;
mod min_event_delay;
mod scheduler;
mod view_state_manager;
pub(crate) use async_event_sender::*;
pub(crate) use min_event_delay::*;
pub use scheduler::*;
pub use view_state_manager::*;

#[cfg(test)]
mod scheduler_test;

use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::TopologyEvent;
use crate::TopologyView;

/// Receives topology events, one call per enqueued event, from the async
/// event sender's worker. Never called while the state lock is held, so
/// implementations may call back into the manager (e.g. to unbind).
pub trait TopologyEventListener: Send + Sync + 'static {
    fn handle_topology_event(
        &self,
        event: &TopologyEvent,
    ) -> Result<()>;
}

impl<F> TopologyEventListener for F
where
    F: Fn(&TopologyEvent) -> Result<()> + Send + Sync + 'static,
{
    fn handle_topology_event(
        &self,
        event: &TopologyEvent,
    ) -> Result<()> {
        self(event)
    }
}

/// Continuation handed to [`ConsistencyService::sync`]
pub type SyncCallback = Box<dyn FnOnce() + Send + 'static>;

/// External gate that must approve a membership-reducing transition before
/// TOPOLOGY_CHANGED is sent.
#[cfg_attr(test, automock)]
pub trait ConsistencyService: Send + Sync + 'static {
    /// Verifies `view`, then invokes `callback` at most once, either before
    /// returning or later from any thread. Never invoking it means the
    /// change is never finalized.
    fn sync(
        &self,
        view: Arc<TopologyView>,
        callback: SyncCallback,
    );

    /// Abandons any outstanding sync. A callback already handed out may
    /// still fire; the manager discards it as stale. Must not invoke pending
    /// callbacks itself.
    fn cancel_sync(&self) {}
}

/// Upstream producer of topology views, re-polled once an event delay elapses.
#[cfg_attr(test, automock)]
pub trait DiscoverySource: Send + Sync + 'static {
    fn current_topology(&self) -> Arc<TopologyView>;
}

/// One-shot task handed to [`Scheduler::schedule_once`]
pub type ScheduledTask = Box<dyn FnOnce() + Send + 'static>;

/// One-shot delayed execution.
#[cfg_attr(test, automock)]
pub trait Scheduler: Send + Sync + 'static {
    /// Runs `task` once after `delay`. Returns false if the task was
    /// rejected. The task must not run on the calling thread before this
    /// method returns.
    fn schedule_once(
        &self,
        delay: Duration,
        task: ScheduledTask,
    ) -> bool;
}

/// Identity wrapper used for listener bookkeeping: two handles are equal
/// iff they point at the same listener allocation.
#[derive(Clone)]
pub struct ListenerHandle(Arc<dyn TopologyEventListener>);

impl ListenerHandle {
    pub fn new(listener: Arc<dyn TopologyEventListener>) -> Self {
        Self(listener)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn handle_topology_event(
        &self,
        event: &TopologyEvent,
    ) -> Result<()> {
        self.0.handle_topology_event(event)
    }
}

impl PartialEq for ListenerHandle {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for ListenerHandle {}

impl Hash for ListenerHandle {
    fn hash<H: Hasher>(
        &self,
        state: &mut H,
    ) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Listener@{:#x}", self.addr())
    }
}
