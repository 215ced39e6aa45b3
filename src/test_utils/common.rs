use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use super::RecordingListener;
use crate::InstanceDescription;
use crate::TopologyEvent;
use crate::TopologyView;
use crate::ViewStateConfig;
use crate::ViewStateManager;

pub(crate) const CLUSTER_ID: &str = "cluster-1";
pub(crate) const LOCAL_ID: &str = "local";

pub(crate) const ASYNC_EVENTS_TIMEOUT: Duration = Duration::from_secs(5);

static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Fresh instance id, unique within the test binary
pub(crate) fn next_instance_id() -> String {
    format!("instance-{}", INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed))
}

/// Delay disabled, short backoff and poll period
pub(crate) fn test_config() -> ViewStateConfig {
    ViewStateConfig {
        min_event_delay_secs: 0,
        dispatcher_fault_backoff_ms: 10,
        async_events_poll_interval_ms: 5,
    }
}

pub(crate) fn local_instance(id: &str) -> InstanceDescription {
    InstanceDescription::new(id, CLUSTER_ID).local().leader()
}

/// View made of the local instance `local_id` plus `others`, all in
/// [`CLUSTER_ID`]
pub(crate) fn view_of(
    local_id: &str,
    others: &[&str],
) -> Arc<TopologyView> {
    let mut instances = vec![local_instance(local_id)];
    instances.extend(others.iter().map(|id| InstanceDescription::new(*id, CLUSTER_ID)));
    Arc::new(TopologyView::new(Some(local_id.to_string()), instances).unwrap())
}

/// Local instance plus one freshly named peer
pub(crate) fn new_view() -> Arc<TopologyView> {
    view_of(LOCAL_ID, &[&next_instance_id()])
}

/// Current copy of `view`, equal to it
pub(crate) fn clone_view(view: &TopologyView) -> Arc<TopologyView> {
    let local_id = view.local_instance().map(|i| i.instance_id.clone());
    Arc::new(TopologyView::new(local_id, view.instances().cloned().collect()).unwrap())
}

/// Current copy of `view` with `instance_id` removed
pub(crate) fn view_without(
    view: &TopologyView,
    instance_id: &str,
) -> Arc<TopologyView> {
    let local_id = view.local_instance().map(|i| i.instance_id.clone());
    let instances = view
        .instances()
        .filter(|i| i.instance_id != instance_id)
        .cloned()
        .collect();
    Arc::new(TopologyView::new(local_id, instances).unwrap())
}

/// Current copy of `view` where `instance_id` carries `key=value`
pub(crate) fn view_with_property(
    view: &TopologyView,
    instance_id: &str,
    key: &str,
    value: &str,
) -> Arc<TopologyView> {
    let local_id = view.local_instance().map(|i| i.instance_id.clone());
    let instances = view
        .instances()
        .map(|i| {
            if i.instance_id == instance_id {
                i.clone().with_property(key, value)
            } else {
                i.clone()
            }
        })
        .collect();
    Arc::new(TopologyView::new(local_id, instances).unwrap())
}

/// Waits for the sender to drain, then checks and clears what `listener` got
pub(crate) async fn assert_events(
    manager: &ViewStateManager,
    listener: &RecordingListener,
    expected: Vec<TopologyEvent>,
) {
    assert_eq!(
        0,
        manager.wait_for_async_events(Some(ASYNC_EVENTS_TIMEOUT)).await,
        "async events did not drain"
    );
    assert_eq!(listener.take_events(), expected);
}

pub(crate) async fn assert_no_events(
    manager: &ViewStateManager,
    listener: &RecordingListener,
) {
    assert_events(manager, listener, vec![]).await;
}

/// Drives `manager` through `rounds` random changing / new-view cycles and
/// checks every listener sees the matching CHANGING and CHANGED events.
///
/// Requires an activated manager without consistency service nor event
/// delay, holding a previous view.
pub(crate) async fn random_event_loop(
    manager: &ViewStateManager,
    seed: u64,
    rounds: usize,
    listeners: &[&RecordingListener],
) {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..rounds {
        let previous = manager.previous_view().expect("random_event_loop needs a previous view");
        let call_changing = rng.gen_bool(0.5);
        if call_changing {
            manager.handle_changing();
            for listener in listeners {
                assert_events(manager, listener, vec![TopologyEvent::changing(previous.clone())]).await;
            }
        }

        let peers: Vec<String> = (0..rng.gen_range(1..=3)).map(|_| next_instance_id()).collect();
        let peer_refs: Vec<&str> = peers.iter().map(String::as_str).collect();
        let next = view_of(LOCAL_ID, &peer_refs);
        manager.handle_new_view(next.clone()).unwrap();

        let mut expected = Vec::new();
        if !call_changing {
            expected.push(TopologyEvent::changing(previous.clone()));
        }
        expected.push(TopologyEvent::changed(previous.clone(), next.clone()));
        for listener in listeners {
            assert_events(manager, listener, expected.clone()).await;
        }
        assert!(!previous.is_current());
        assert!(next.is_current());
    }
}
