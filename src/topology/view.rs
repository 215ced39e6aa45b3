use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use super::InstanceDescription;
use crate::Error;
use crate::Result;

/// Snapshot of cluster membership plus per-instance properties.
///
/// Views are produced by the discovery layer and shared as `Arc<TopologyView>`.
/// The only mutable part is the `current` flag: it starts `true` and is
/// cleared once the view has been superseded. A view that was marked not
/// current never becomes current again.
///
/// Equality compares membership and properties only, never the flag.
pub struct TopologyView {
    local_instance_id: Option<String>,
    instances: BTreeMap<String, InstanceDescription>,
    current: AtomicBool,
}

impl TopologyView {
    /// Builds a current view.
    ///
    /// `local_instance_id` names the entry describing the hosting instance.
    /// It is not required to be present: only views handed to the state
    /// manager as current are checked for it.
    ///
    /// # Errors
    /// `Error::InvalidArgument` if two descriptions share an instance id.
    pub fn new(
        local_instance_id: Option<String>,
        instances: Vec<InstanceDescription>,
    ) -> Result<Self> {
        let mut map = BTreeMap::new();
        for instance in instances {
            let id = instance.instance_id.clone();
            if map.insert(id.clone(), instance).is_some() {
                return Err(Error::InvalidArgument(format!(
                    "Duplicated instance found for instance_id: {id}"
                )));
            }
        }
        Ok(Self {
            local_instance_id,
            instances: map,
            current: AtomicBool::new(true),
        })
    }

    /// Builds a view whose local instance is the (first) entry flagged local
    pub fn from_instances(instances: Vec<InstanceDescription>) -> Result<Self> {
        let local = instances
            .iter()
            .find(|i| i.is_local)
            .map(|i| i.instance_id.clone());
        Self::new(local, instances)
    }

    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire)
    }

    /// Marks this view as superseded. Irreversible.
    pub fn set_not_current(&self) {
        self.current.store(false, Ordering::Release);
    }

    /// All instances, ordered by instance id
    pub fn instances(&self) -> impl Iterator<Item = &InstanceDescription> {
        self.instances.values()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn instance(
        &self,
        instance_id: &str,
    ) -> Option<&InstanceDescription> {
        self.instances.get(instance_id)
    }

    pub fn contains(
        &self,
        instance_id: &str,
    ) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn local_instance(&self) -> Option<&InstanceDescription> {
        self.local_instance_id
            .as_deref()
            .and_then(|id| self.instances.get(id))
    }

    /// Cluster grouping of the local instance
    pub fn local_cluster_id(&self) -> Option<&str> {
        self.local_instance().map(|i| i.cluster_id.as_str())
    }

    pub fn cluster_instances<'a>(
        &'a self,
        cluster_id: &'a str,
    ) -> impl Iterator<Item = &'a InstanceDescription> + 'a {
        self.instances
            .values()
            .filter(move |i| i.cluster_id == cluster_id)
    }

    /// Instance ids joined by `,`, for compact logs
    pub fn instance_ids(&self) -> String {
        self.instances.keys().cloned().collect::<Vec<_>>().join(",")
    }
}

impl PartialEq for TopologyView {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.instances == other.instances
    }
}

impl Eq for TopologyView {}

impl fmt::Debug for TopologyView {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("TopologyView")
            .field("current", &self.is_current())
            .field("local_instance_id", &self.local_instance_id)
            .field("instances", &self.instances.values().collect::<Vec<_>>())
            .finish()
    }
}
