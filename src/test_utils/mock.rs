use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ConsistencyService;
use crate::DiscoverySource;
use crate::Result;
use crate::ScheduledTask;
use crate::Scheduler;
use crate::SyncCallback;
use crate::TopologyEvent;
use crate::TopologyEventListener;
use crate::TopologyView;

/// Listener keeping every event it receives
#[derive(Default)]
pub(crate) struct RecordingListener {
    events: Mutex<Vec<TopologyEvent>>,
}

impl RecordingListener {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn events(&self) -> Vec<TopologyEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn take_events(&self) -> Vec<TopologyEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl TopologyEventListener for RecordingListener {
    fn handle_topology_event(
        &self,
        event: &TopologyEvent,
    ) -> Result<()> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Consistency service that parks every callback until the test releases it
#[derive(Default)]
pub(crate) struct HeldConsistencyService {
    pending: Mutex<VecDeque<(Arc<TopologyView>, SyncCallback)>>,
    calls: AtomicUsize,
}

impl HeldConsistencyService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Invokes the oldest parked callback. Returns the view it was for.
    pub(crate) fn release_next(&self) -> Option<Arc<TopologyView>> {
        let (view, callback) = self.pending.lock().pop_front()?;
        callback();
        Some(view)
    }
}

impl ConsistencyService for HeldConsistencyService {
    fn sync(
        &self,
        view: Arc<TopologyView>,
        callback: SyncCallback,
    ) {
        self.calls.fetch_add(1, Ordering::AcqRel);
        self.pending.lock().push_back((view, callback));
    }
}

/// Consistency service confirming synchronously, on the calling thread
#[derive(Default)]
pub(crate) struct ImmediateConsistencyService {
    calls: AtomicUsize,
}

impl ImmediateConsistencyService {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::Acquire)
    }
}

impl ConsistencyService for ImmediateConsistencyService {
    fn sync(
        &self,
        _view: Arc<TopologyView>,
        callback: SyncCallback,
    ) {
        self.calls.fetch_add(1, Ordering::AcqRel);
        callback();
    }
}

/// Scheduler whose tasks only run when the test says so
#[derive(Default)]
pub(crate) struct ManualScheduler {
    tasks: Mutex<VecDeque<(Duration, ScheduledTask)>>,
}

impl ManualScheduler {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Runs the oldest task. Returns the delay it was scheduled with.
    pub(crate) fn run_next(&self) -> Option<Duration> {
        let (delay, task) = self.tasks.lock().pop_front()?;
        task();
        Some(delay)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(
        &self,
        delay: Duration,
        task: ScheduledTask,
    ) -> bool {
        self.tasks.lock().push_back((delay, task));
        true
    }
}

/// Discovery source returning whatever view the test last set
pub(crate) struct SettableDiscoverySource {
    view: Mutex<Arc<TopologyView>>,
}

impl SettableDiscoverySource {
    pub(crate) fn new(view: Arc<TopologyView>) -> Arc<Self> {
        Arc::new(Self { view: Mutex::new(view) })
    }

    pub(crate) fn set(
        &self,
        view: Arc<TopologyView>,
    ) {
        *self.view.lock() = view;
    }
}

impl DiscoverySource for SettableDiscoverySource {
    fn current_topology(&self) -> Arc<TopologyView> {
        self.view.lock().clone()
    }
}
