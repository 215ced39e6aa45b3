//! Minimum event delay.
//!
//! When a current view arrives that really changes the topology, sending
//! TOPOLOGY_CHANGED is postponed by a fixed delay. Views arriving meanwhile
//! are absorbed; once the delay elapses the latest view is fetched from the
//! discovery source and applied. This turns a flapping topology into a
//! single CHANGED event.
//!
//! The delaying flag lives in the manager's state and is only touched under
//! the state lock. Each armed delay carries a ticket; a callback whose ticket
//! no longer matches (delay cancelled or superseded) is dropped.

use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::DiscoverySource;
use super::ScheduledTask;
use super::Scheduler;
use super::ViewStateManager;
use crate::constants::MIN_EVENT_DELAY_NAME;
use crate::TopologyView;

/// How a freshly arrived view relates to the last announced one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViewComparison {
    NoPreviousView,
    PropertiesOnly,
    Unchanged,
    Changed,
}

#[derive(Debug, Default)]
pub(crate) struct DelayState {
    delaying: Option<u64>,
    last_ticket: u64,
}

impl DelayState {
    pub(crate) fn is_delaying(&self) -> bool {
        self.delaying.is_some()
    }

    fn arm(&mut self) -> u64 {
        self.last_ticket += 1;
        self.delaying = Some(self.last_ticket);
        self.last_ticket
    }

    /// Clears the delaying flag if `ticket` is the active one.
    /// Returns false for stale tickets.
    pub(crate) fn finish(
        &mut self,
        ticket: u64,
    ) -> bool {
        if self.delaying == Some(ticket) {
            self.delaying = None;
            true
        } else {
            false
        }
    }

    fn cancel(&mut self) -> bool {
        self.delaying.take().is_some()
    }
}

pub(crate) struct MinEventDelayHandler {
    discovery_source: Arc<dyn DiscoverySource>,
    scheduler: Arc<dyn Scheduler>,
    min_event_delay: Duration,
}

impl MinEventDelayHandler {
    pub(crate) fn new(
        discovery_source: Arc<dyn DiscoverySource>,
        scheduler: Arc<dyn Scheduler>,
        min_event_delay: Duration,
    ) -> Self {
        Self {
            discovery_source,
            scheduler,
            min_event_delay,
        }
    }

    pub(crate) fn min_event_delay(&self) -> Duration {
        self.min_event_delay
    }

    /// Decides whether the new view is absorbed by delaying. Must be called
    /// with the state lock held.
    ///
    /// Returns true if the view was taken care of (already delaying, or a
    /// delay was armed), false if the caller should apply it directly.
    pub(crate) fn handles_new_view(
        &self,
        delay: &mut DelayState,
        comparison: ViewComparison,
        manager: &Weak<ViewStateManager>,
    ) -> bool {
        if delay.is_delaying() {
            debug!("handles_new_view: already delaying, absorbing new view");
            return true;
        }
        match comparison {
            ViewComparison::Changed => {}
            other => {
                debug!("handles_new_view: not delaying ({:?})", other);
                return false;
            }
        }
        self.trigger_async_delaying(delay, manager)
    }

    /// Arms a delay. Returns false if the scheduler rejected the task, in
    /// which case the delaying flag is left unset.
    pub(crate) fn trigger_async_delaying(
        &self,
        delay: &mut DelayState,
        manager: &Weak<ViewStateManager>,
    ) -> bool {
        let ticket = delay.arm();
        let manager = manager.clone();
        let task: ScheduledTask = Box::new(move || match manager.upgrade() {
            Some(manager) => manager.on_min_event_delay_elapsed(ticket),
            None => debug!("{}: manager dropped, ignoring ticket {}", MIN_EVENT_DELAY_NAME, ticket),
        });

        if self.scheduler.schedule_once(self.min_event_delay, task) {
            info!(
                "{}: delaying event for {:?} (ticket {})",
                MIN_EVENT_DELAY_NAME, self.min_event_delay, ticket
            );
            true
        } else {
            warn!(
                "{}: scheduler rejected delay task, not delaying",
                MIN_EVENT_DELAY_NAME
            );
            delay.finish(ticket);
            false
        }
    }

    pub(crate) fn cancel_delaying(
        &self,
        delay: &mut DelayState,
    ) {
        if delay.cancel() {
            debug!("{}: delaying cancelled", MIN_EVENT_DELAY_NAME);
        }
    }

    /// Fetches the latest view from upstream. Called without the state lock.
    pub(crate) fn current_topology(&self) -> Arc<TopologyView> {
        let view = self.discovery_source.current_topology();
        trace!("current_topology: {:?}", view);
        view
    }
}
