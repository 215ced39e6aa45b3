//! Core of the discovery view layer: tracks the announced topology view,
//! the changing/stable state and the bound listeners, and decides which
//! TOPOLOGY_INIT, TOPOLOGY_CHANGING, TOPOLOGY_CHANGED or PROPERTIES_CHANGED
//! event each listener receives.
//!
//! ## Locking
//! All state sits behind one `parking_lot::Mutex`. Every public method holds
//! it for its synchronous part. The lock is never held while a listener runs
//! (delivery happens on the async event sender), while the consistency
//! service is invoked, or while the discovery source is polled.
//!
//! ## Staleness
//! `mod_count` increments on activate, deactivate, changing and on every
//! applied new view. Asynchronous re-entries (consistency callback) capture it
//! and finalize only if it is unchanged once they re-acquire the lock. The
//! minimum event delay uses its own ticket for the same purpose.

use std::collections::HashMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::AsyncEventSender;
use super::ConsistencyService;
use super::DelayState;
use super::DiscoverySource;
use super::ListenerHandle;
use super::MinEventDelayHandler;
use super::Scheduler;
use super::SyncCallback;
use super::TokioScheduler;
use super::TopologyEventListener;
use super::ViewComparison;
use crate::any_instance_left_local_cluster;
use crate::is_properties_diff;
use crate::Error;
use crate::Result;
use crate::TopologyEvent;
use crate::TopologyEventType;
use crate::TopologyView;
use crate::ViewStateConfig;

struct ManagerState {
    /// Set by `handle_activated`, cleared by `handle_deactivated`. No events
    /// are sent while false.
    activated: bool,

    /// True between a changing notification and the finalization of the
    /// following view
    is_changing: bool,

    /// Most recently applied current view. Sent with INIT to new listeners,
    /// as old view with CHANGING/CHANGED/PROPERTIES_CHANGED.
    previous_view: Option<Arc<TopologyView>>,

    mod_count: u64,

    /// Listeners that already received their TOPOLOGY_INIT
    event_listeners: Vec<ListenerHandle>,

    /// Listeners bound while no stable view was available. Promoted to
    /// `event_listeners` once they are sent their TOPOLOGY_INIT.
    uninitialized_listeners: Vec<ListenerHandle>,

    /// Last enqueued event type per listener, to never send TOPOLOGY_CHANGING twice in a row
    last_event_types: HashMap<ListenerHandle, TopologyEventType>,

    async_event_sender: Option<AsyncEventSender>,

    delay: DelayState,
}

impl ManagerState {
    fn new() -> Self {
        Self {
            activated: false,
            is_changing: false,
            previous_view: None,
            mod_count: 0,
            event_listeners: Vec::new(),
            uninitialized_listeners: Vec::new(),
            last_event_types: HashMap::new(),
            async_event_sender: None,
            delay: DelayState::default(),
        }
    }

    fn is_bound(
        &self,
        listener: &ListenerHandle,
    ) -> bool {
        self.event_listeners.contains(listener) || self.uninitialized_listeners.contains(listener)
    }

    fn compare_with_previous(
        &self,
        new_view: &TopologyView,
    ) -> ViewComparison {
        match &self.previous_view {
            None => ViewComparison::NoPreviousView,
            Some(previous) if is_properties_diff(previous, new_view) => ViewComparison::PropertiesOnly,
            Some(previous) if !self.is_changing && **previous == *new_view => ViewComparison::Unchanged,
            Some(_) => ViewComparison::Changed,
        }
    }

    fn enqueue(
        &mut self,
        listener: &ListenerHandle,
        event: TopologyEvent,
    ) {
        let Some(sender) = &self.async_event_sender else {
            // only reachable when called while not activated
            warn!("enqueue: async event sender not running, cannot send {} to {:?}", event, listener);
            return;
        };
        let event_type = event.event_type();
        if event_type == TopologyEventType::TopologyChanging
            && self.last_event_types.get(listener) == Some(&TopologyEventType::TopologyChanging)
        {
            debug!("enqueue: {:?} already got TOPOLOGY_CHANGING", listener);
            return;
        }
        debug!("enqueue: enqueuing {} to {:?}", event, listener);
        match sender.enqueue(listener.clone(), event) {
            Ok(()) => {
                self.last_event_types.insert(listener.clone(), event_type);
            }
            Err(e) => {
                warn!("enqueue: failed to enqueue to {:?}: {:?}", listener, e);
            }
        }
    }

    fn enqueue_for_initialized(
        &mut self,
        event: TopologyEvent,
    ) {
        info!(
            "enqueue_for_initialized: sending {} to all ({}) listeners",
            event,
            self.event_listeners.len()
        );
        let audience = self.event_listeners.clone();
        for listener in &audience {
            self.enqueue(listener, event.clone());
        }
    }

    /// Sends INIT to all uninitialized listeners and moves them over
    fn initialize_pending_listeners(
        &mut self,
        view: Arc<TopologyView>,
    ) {
        if self.uninitialized_listeners.is_empty() {
            return;
        }
        debug!(
            "sending TOPOLOGY_INIT to uninitialized listeners ({})",
            self.uninitialized_listeners.len()
        );
        let event = TopologyEvent::init(view);
        let pending = std::mem::take(&mut self.uninitialized_listeners);
        for listener in &pending {
            self.enqueue(listener, event.clone());
        }
        self.event_listeners.extend(pending);
    }

    /// Replaces the previous view, marking the replaced one not current
    fn replace_previous_view(
        &mut self,
        new_view: Arc<TopologyView>,
    ) {
        trace!("setting previous_view to {:?}", new_view);
        if let Some(previous) = self.previous_view.replace(new_view.clone()) {
            if !Arc::ptr_eq(&previous, &new_view) {
                previous.set_not_current();
            }
        }
    }
}

/// Manages topology event listeners and the changing/changed view state,
/// sending each listener the matching topology events.
///
/// Built via [`ViewStateManagerBuilder`] as an `Arc`, since asynchronous
/// callbacks hold a weak back-reference.
pub struct ViewStateManager {
    state: Mutex<ManagerState>,
    consistency_service: Option<Arc<dyn ConsistencyService>>,
    min_event_delay_handler: Option<MinEventDelayHandler>,
    runtime: Handle,
    config: ViewStateConfig,
    in_flight: Arc<AtomicUsize>,
    me: Weak<ViewStateManager>,
}

impl std::fmt::Debug for ViewStateManager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ViewStateManager")
            .field("activated", &state.activated)
            .field("is_changing", &state.is_changing)
            .field("mod_count", &state.mod_count)
            .finish()
    }
}

impl ViewStateManager {
    pub fn builder(config: ViewStateConfig) -> ViewStateManagerBuilder {
        ViewStateManagerBuilder::new(config)
    }

    /// Registers a listener.
    ///
    /// The listener gets TOPOLOGY_INIT right away if activated and a stable
    /// view exists, otherwise its INIT is deferred. Binding an already bound
    /// listener is a no-op.
    pub fn bind(
        &self,
        listener: Arc<dyn TopologyEventListener>,
    ) {
        let listener = ListenerHandle::new(listener);
        trace!("bind: start {:?}", listener);
        let mut state = self.state.lock();

        if state.is_bound(&listener) {
            info!("bind: listener already registered: {:?}", listener);
            return;
        }

        if !state.activated {
            debug!("bind: not yet activated, delaying INIT to {:?}", listener);
            state.uninitialized_listeners.push(listener);
            return;
        }

        match state.previous_view.clone() {
            Some(view) if !state.is_changing => {
                debug!("bind: view is defined, sending INIT now to {:?}", listener);
                state.enqueue(&listener, TopologyEvent::init(view));
                state.event_listeners.push(listener);
            }
            _ => {
                debug!(
                    "bind: view not defined (is_changing: {}, previous_view: {}), delaying INIT to {:?}",
                    state.is_changing,
                    state.previous_view.is_some(),
                    listener
                );
                state.uninitialized_listeners.push(listener);
            }
        }
    }

    /// Removes a listener. Returns whether it was bound.
    pub fn unbind(
        &self,
        listener: Arc<dyn TopologyEventListener>,
    ) -> bool {
        let listener = ListenerHandle::new(listener);
        trace!("unbind: start {:?}", listener);
        let mut state = self.state.lock();

        let before = state.event_listeners.len() + state.uninitialized_listeners.len();
        state.event_listeners.retain(|l| l != &listener);
        state.uninitialized_listeners.retain(|l| l != &listener);
        state.last_event_types.remove(&listener);
        let found = state.event_listeners.len() + state.uninitialized_listeners.len() != before;
        debug!("unbind: released {:?} (found: {})", listener, found);
        found
    }

    /// Starts the async event sender and, if a stable view is known, sends
    /// TOPOLOGY_INIT to every pending listener.
    pub fn handle_activated(&self) {
        trace!("handle_activated: start");
        let mut state = self.state.lock();
        state.activated = true;
        state.mod_count += 1;

        if let Some(stale) = state.async_event_sender.take() {
            warn!("handle_activated: already activated, replacing async event sender");
            stale.flush_then_stop();
        }
        state.async_event_sender = Some(AsyncEventSender::start(
            &self.runtime,
            self.config.dispatcher_fault_backoff(),
            self.in_flight.clone(),
        ));

        if let Some(view) = state.previous_view.clone() {
            if !state.is_changing {
                state.initialize_pending_listeners(view);
            }
        }
        debug!("handle_activated: activated (mod_count={})", state.mod_count);
    }

    /// Stops event delivery (after flushing already queued events), forgets
    /// the previous view and all listeners. Listeners must bind again.
    pub fn handle_deactivated(&self) {
        trace!("handle_deactivated: start");
        let mut state = self.state.lock();
        state.activated = false;
        state.mod_count += 1;

        if let Some(sender) = state.async_event_sender.take() {
            sender.flush_then_stop();
        }

        if let Some(previous) = state.previous_view.take() {
            previous.set_not_current();
        }

        if let Some(handler) = &self.min_event_delay_handler {
            handler.cancel_delaying(&mut state.delay);
        }

        state.is_changing = false;
        state.event_listeners.clear();
        state.uninitialized_listeners.clear();
        state.last_event_types.clear();
        debug!("handle_deactivated: deactivated (mod_count={})", state.mod_count);
        drop(state);

        self.cancel_consistency_sync();
    }

    /// Marks the topology as changing and sends TOPOLOGY_CHANGING to the
    /// initialized listeners. No-op if already changing.
    pub fn handle_changing(&self) {
        trace!("handle_changing: start");
        let mut state = self.state.lock();
        Self::changing(&mut state);
    }

    fn changing(state: &mut ManagerState) {
        if state.is_changing {
            debug!("handle_changing: was already changing - ignoring");
            return;
        }
        state.mod_count += 1;
        state.is_changing = true;

        if !state.activated {
            debug!("handle_changing: not yet activated - ignoring");
            return;
        }
        let Some(previous) = state.previous_view.clone() else {
            debug!("handle_changing: no previous view set - ignoring");
            return;
        };

        debug!("handle_changing: sending TOPOLOGY_CHANGING to initialized listeners");
        previous.set_not_current();
        state.enqueue_for_initialized(TopologyEvent::changing(previous));
    }

    /// Entry point for a freshly computed view.
    ///
    /// A view that is not current degenerates into `handle_changing`. A
    /// current view may be absorbed by the minimum event delay, otherwise it
    /// is applied right away.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if a current view lacks its local instance or
    /// the local instance is not flagged local.
    pub fn handle_new_view(
        &self,
        new_view: Arc<TopologyView>,
    ) -> Result<()> {
        trace!("handle_new_view: start, new_view={:?}", new_view);
        if !new_view.is_current() {
            debug!("handle_new_view: new view is not current - calling handle_changing");
            self.handle_changing();
            return Ok(());
        }

        let local_instance = new_view.local_instance().ok_or_else(|| {
            Error::InvalidArgument("new view does not contain the local instance - hence cannot be current".into())
        })?;
        if !local_instance.is_local {
            return Err(Error::InvalidArgument(
                "new view's local instance is not flagged local - hence cannot be current".into(),
            ));
        }

        // any sync still running was started for an older view
        self.cancel_consistency_sync();

        if let Some(handler) = &self.min_event_delay_handler {
            let mut state = self.state.lock();
            let comparison = state.compare_with_previous(&new_view);
            if handler.handles_new_view(&mut state.delay, comparison, &self.me) {
                return Ok(());
            }
            debug!("handle_new_view: event delaying not applicable this time");
        }

        self.handle_new_view_non_delayed(new_view).map(|_| ())
    }

    /// Applies a current view: sends CHANGING if needed, then either
    /// PROPERTIES_CHANGED or (possibly after the consistency service) CHANGED.
    ///
    /// Returns false if the view equals the announced one and nothing was sent.
    pub(crate) fn handle_new_view_non_delayed(
        &self,
        new_view: Arc<TopologyView>,
    ) -> Result<bool> {
        trace!("handle_new_view_non_delayed: start");
        let mut state = self.state.lock();
        debug!("handle_new_view_non_delayed: new_view={:?}", new_view);
        if !new_view.is_current() {
            error!("handle_new_view_non_delayed: new view must be current");
            return Err(Error::InvalidArgument("new view must be current".into()));
        }
        state.mod_count += 1;

        if !state.is_changing {
            if let Some(previous) = &state.previous_view {
                if **previous == *new_view {
                    debug!("handle_new_view_non_delayed: not changing and new view matches old - ignoring");
                    return Ok(false);
                }
            }
            let properties_only = state
                .previous_view
                .as_ref()
                .map(|previous| is_properties_diff(previous, &new_view))
                .unwrap_or(false);
            if !properties_only {
                debug!("handle_new_view_non_delayed: implicitly triggering handle_changing");
                Self::changing(&mut state);
            }
        }

        if !state.activated {
            // no events before activation: just remember the view
            state.replace_previous_view(new_view);
            state.is_changing = false;
            debug!("handle_new_view_non_delayed: not yet activated - ignoring");
            return Ok(true);
        }

        if !state.is_changing {
            // only a properties diff gets here without being in changing state
            if let Some(previous) = state.previous_view.clone() {
                info!("handle_new_view_non_delayed: properties changed to: {:?}", new_view);
                previous.set_not_current();
                state.enqueue_for_initialized(TopologyEvent::properties_changed(previous, new_view.clone()));
                state.replace_previous_view(new_view);
                return Ok(true);
            }
        }

        let invoke_consistency_service = match (&self.consistency_service, &state.previous_view) {
            (None, _) => {
                debug!("handle_new_view_non_delayed: no consistency service set - continuing directly");
                false
            }
            (Some(_), None) => {
                // cannot tell whether anyone left: be conservative
                debug!("handle_new_view_non_delayed: no previous view - invoking consistency service");
                true
            }
            (Some(_), Some(previous)) => {
                let any_left = any_instance_left_local_cluster(previous, &new_view);
                debug!(
                    "handle_new_view_non_delayed: any instance left local cluster: {}",
                    any_left
                );
                any_left
            }
        };

        if invoke_consistency_service {
            let expected_mod_count = state.mod_count;
            drop(state);
            self.invoke_consistency_service(new_view, expected_mod_count);
        } else {
            Self::do_handle_consistent(&mut state, new_view);
        }
        debug!("handle_new_view_non_delayed: end");
        Ok(true)
    }

    fn invoke_consistency_service(
        &self,
        new_view: Arc<TopologyView>,
        expected_mod_count: u64,
    ) {
        let Some(service) = self.consistency_service.clone() else {
            return;
        };
        info!(
            "invoke_consistency_service: syncing (mod_count={})",
            expected_mod_count
        );

        let manager = self.me.clone();
        let view = new_view.clone();
        let callback: SyncCallback = Box::new(move || match manager.upgrade() {
            Some(manager) => manager.on_consistent(view, expected_mod_count),
            None => debug!("consistency callback: manager dropped - ignoring"),
        });

        if catch_unwind(AssertUnwindSafe(|| service.sync(new_view, callback))).is_err() {
            error!("invoke_consistency_service: consistency service panicked, aborting this change");
        }
    }

    /// Called without the state lock held.
    fn cancel_consistency_sync(&self) {
        let Some(service) = &self.consistency_service else {
            return;
        };
        trace!("cancel_consistency_sync: cancelling outstanding sync");
        if catch_unwind(AssertUnwindSafe(|| service.cancel_sync())).is_err() {
            error!("cancel_consistency_sync: consistency service panicked while cancelling");
        }
    }

    fn on_consistent(
        &self,
        new_view: Arc<TopologyView>,
        expected_mod_count: u64,
    ) {
        trace!("consistency callback: start, acquiring lock");
        let mut state = self.state.lock();
        if state.mod_count != expected_mod_count {
            info!(
                "consistency callback: mod_count changed (from {} to {}) - ignoring",
                expected_mod_count, state.mod_count
            );
            return;
        }
        debug!("consistency callback: invoking do_handle_consistent");
        Self::do_handle_consistent(&mut state, new_view);
    }

    fn do_handle_consistent(
        state: &mut ManagerState,
        new_view: Arc<TopologyView>,
    ) {
        trace!("do_handle_consistent: start");
        state.is_changing = false;

        match state.previous_view.clone() {
            None => {
                if state.event_listeners.is_empty() {
                    debug!("do_handle_consistent: no previous view and no initialized listeners");
                } else {
                    info!("do_handle_consistent: no previous view even though listeners are initialized");
                }
            }
            Some(previous) => {
                debug!("do_handle_consistent: sending TOPOLOGY_CHANGED to initialized listeners");
                if !Arc::ptr_eq(&previous, &new_view) {
                    previous.set_not_current();
                }
                state.enqueue_for_initialized(TopologyEvent::changed(previous, new_view.clone()));
            }
        }

        state.initialize_pending_listeners(new_view.clone());
        state.replace_previous_view(new_view);
        trace!("do_handle_consistent: end");
    }

    /// Invoked by the scheduler once a minimum event delay elapsed
    pub(crate) fn on_min_event_delay_elapsed(
        &self,
        ticket: u64,
    ) {
        let Some(handler) = &self.min_event_delay_handler else {
            return;
        };
        if !self.state.lock().delay.finish(ticket) {
            debug!("on_min_event_delay_elapsed: ticket {} is stale - ignoring", ticket);
            return;
        }

        let view = handler.current_topology();
        if view.is_current() {
            debug!("on_min_event_delay_elapsed: applying latest view");
            if let Err(e) = self.handle_new_view_non_delayed(view) {
                error!("on_min_event_delay_elapsed: applying latest view failed: {:?}", e);
            }
            return;
        }

        // upstream has no definitive answer yet: wait another round
        let mut state = self.state.lock();
        if state.delay.is_delaying() {
            return;
        }
        if !handler.trigger_async_delaying(&mut state.delay, &self.me) {
            warn!("on_min_event_delay_elapsed: latest view not current and re-arming the delay failed");
        }
    }

    /// Waits until no event is queued or being delivered (and no delay is
    /// pending), or until `timeout` elapses. `None` waits indefinitely.
    ///
    /// Returns the number of events still in flight (0 on success).
    pub async fn wait_for_async_events(
        &self,
        timeout: Option<Duration>,
    ) -> usize {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let in_flight = self.in_flight_async_event_count();
            if in_flight == 0 {
                return 0;
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return in_flight;
                }
            }
            tokio::time::sleep(self.config.async_events_poll_interval()).await;
        }
    }

    /// Events queued or being delivered, plus one while delaying
    pub fn in_flight_async_event_count(&self) -> usize {
        let mut count = self.in_flight.load(Ordering::Acquire);
        if self.is_delaying() {
            count += 1;
        }
        count
    }

    pub fn has_in_flight_event(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }

    pub fn is_activated(&self) -> bool {
        self.state.lock().activated
    }

    pub fn is_changing(&self) -> bool {
        self.state.lock().is_changing
    }

    pub fn is_delaying(&self) -> bool {
        self.state.lock().delay.is_delaying()
    }

    pub fn previous_view(&self) -> Option<Arc<TopologyView>> {
        self.state.lock().previous_view.clone()
    }

    pub fn mod_count(&self) -> u64 {
        self.state.lock().mod_count
    }

    /// (initialized, uninitialized) listener counts
    pub fn listener_count(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.event_listeners.len(), state.uninitialized_listeners.len())
    }
}

/// Assembles a [`ViewStateManager`] with its optional collaborators.
///
/// ## Example
/// ```ignore
/// let manager = ViewStateManager::builder(config.view_state)
///     .consistency_service(sync_service)
///     .discovery_source(discovery)
///     .build()?;
/// manager.bind(listener);
/// manager.handle_activated();
/// ```
pub struct ViewStateManagerBuilder {
    config: ViewStateConfig,
    consistency_service: Option<Arc<dyn ConsistencyService>>,
    discovery_source: Option<Arc<dyn DiscoverySource>>,
    scheduler: Option<Arc<dyn Scheduler>>,
    runtime: Option<Handle>,
}

impl ViewStateManagerBuilder {
    pub fn new(config: ViewStateConfig) -> Self {
        Self {
            config,
            consistency_service: None,
            discovery_source: None,
            scheduler: None,
            runtime: None,
        }
    }

    /// Gate membership-reducing changes through `service`
    pub fn consistency_service(
        mut self,
        service: Arc<dyn ConsistencyService>,
    ) -> Self {
        self.consistency_service = Some(service);
        self
    }

    /// Enables the minimum event delay (if `min_event_delay_secs` > 0),
    /// re-polling `source` when the delay elapses
    pub fn discovery_source(
        mut self,
        source: Arc<dyn DiscoverySource>,
    ) -> Self {
        self.discovery_source = Some(source);
        self
    }

    /// Scheduler for the minimum event delay. Defaults to a [`TokioScheduler`]
    /// on the manager's runtime.
    pub fn scheduler(
        mut self,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Runtime hosting the async event sender. Defaults to the current one.
    pub fn runtime(
        mut self,
        runtime: Handle,
    ) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Arc<ViewStateManager>> {
        self.config.validate()?;
        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| Error::NoRuntime(e.to_string()))?,
        };

        let min_event_delay_handler = match (self.discovery_source, self.config.min_event_delay()) {
            (Some(source), Some(delay)) => {
                let scheduler: Arc<dyn Scheduler> = match self.scheduler {
                    Some(scheduler) => scheduler,
                    None => Arc::new(TokioScheduler::new(runtime.clone())),
                };
                let handler = MinEventDelayHandler::new(source, scheduler, delay);
                info!("build: minimum event delay of {:?} installed", handler.min_event_delay());
                Some(handler)
            }
            (Some(_), None) => {
                info!("build: min_event_delay_secs is 0, event delaying disabled");
                None
            }
            (None, _) => None,
        };

        let config = self.config;
        let consistency_service = self.consistency_service;
        Ok(Arc::new_cyclic(|me| ViewStateManager {
            state: Mutex::new(ManagerState::new()),
            consistency_service,
            min_event_delay_handler,
            runtime,
            config,
            in_flight: Arc::new(AtomicUsize::new(0)),
            me: me.clone(),
        }))
    }
}
