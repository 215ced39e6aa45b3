//! Instance-level comparison of two topology views.
//!
//! Instances are matched on `instance_id` only. The resulting
//! [`InstanceCollection`] can be narrowed with chainable filters before the
//! matching descriptions are collected with [`InstanceCollection::get`].

use std::collections::BTreeMap;

use super::InstanceDescription;
use super::TopologyView;

/// Compares the instances of an "old" and a "new" view.
pub struct InstancesDiff<'a> {
    old_instances: BTreeMap<&'a str, &'a InstanceDescription>,
    new_instances: BTreeMap<&'a str, &'a InstanceDescription>,
}

impl<'a> InstancesDiff<'a> {
    pub fn new(
        old_view: &'a TopologyView,
        new_view: &'a TopologyView,
    ) -> Self {
        Self {
            old_instances: Self::index(old_view),
            new_instances: Self::index(new_view),
        }
    }

    fn index(view: &'a TopologyView) -> BTreeMap<&'a str, &'a InstanceDescription> {
        view.instances().map(|i| (i.instance_id.as_str(), i)).collect()
    }

    /// Instances contained in either view. For instances in both, the
    /// description is taken from the new view if `retain_from_new`.
    pub fn all(
        &self,
        retain_from_new: bool,
    ) -> InstanceCollection<'a> {
        let (first, second) = if retain_from_new {
            (&self.old_instances, &self.new_instances)
        } else {
            (&self.new_instances, &self.old_instances)
        };
        let mut partition = first.clone();
        partition.extend(second.iter().map(|(k, v)| (*k, *v)));
        InstanceCollection::new(partition)
    }

    /// Instances in the new view but not in the old one
    pub fn added(&self) -> InstanceCollection<'a> {
        InstanceCollection::new(Self::minus(&self.new_instances, &self.old_instances))
    }

    /// Instances in the old view but not in the new one
    pub fn removed(&self) -> InstanceCollection<'a> {
        InstanceCollection::new(Self::minus(&self.old_instances, &self.new_instances))
    }

    /// Instances in both views
    pub fn retained(
        &self,
        retain_from_new: bool,
    ) -> InstanceCollection<'a> {
        let partition = self
            .old_instances
            .iter()
            .filter_map(|(id, old)| {
                self.new_instances
                    .get(id)
                    .map(|new| (*id, if retain_from_new { *new } else { *old }))
            })
            .collect();
        InstanceCollection::new(partition)
    }

    /// Instances in both views, keeping only those whose properties changed
    /// (`property_changed == true`) or did not change (`false`).
    pub fn retained_with_properties(
        &self,
        retain_from_new: bool,
        property_changed: bool,
    ) -> InstanceCollection<'a> {
        let partition = self
            .old_instances
            .iter()
            .filter_map(|(id, old)| {
                let new = self.new_instances.get(id)?;
                let properties_same = new.properties == old.properties;
                if properties_same != property_changed {
                    Some((*id, if retain_from_new { *new } else { *old }))
                } else {
                    None
                }
            })
            .collect();
        InstanceCollection::new(partition)
    }

    fn minus(
        a: &BTreeMap<&'a str, &'a InstanceDescription>,
        b: &BTreeMap<&'a str, &'a InstanceDescription>,
    ) -> BTreeMap<&'a str, &'a InstanceDescription> {
        a.iter()
            .filter(|(id, _)| !b.contains_key(*id))
            .map(|(k, v)| (*k, *v))
            .collect()
    }
}

#[derive(Debug, Clone)]
enum InstanceFilter {
    Local,
    NotLocal,
    Leader,
    NotLeader,
    InCluster(String),
    NotInCluster(String),
}

impl InstanceFilter {
    fn accept(
        &self,
        instance: &InstanceDescription,
    ) -> bool {
        match self {
            InstanceFilter::Local => instance.is_local,
            InstanceFilter::NotLocal => !instance.is_local,
            InstanceFilter::Leader => instance.is_leader,
            InstanceFilter::NotLeader => !instance.is_leader,
            InstanceFilter::InCluster(id) => &instance.cluster_id == id,
            InstanceFilter::NotInCluster(id) => &instance.cluster_id != id,
        }
    }
}

/// Result of an [`InstancesDiff`] partition with optional filters.
pub struct InstanceCollection<'a> {
    instances: BTreeMap<&'a str, &'a InstanceDescription>,
    filters: Vec<InstanceFilter>,
}

impl<'a> InstanceCollection<'a> {
    fn new(instances: BTreeMap<&'a str, &'a InstanceDescription>) -> Self {
        Self {
            instances,
            filters: Vec::new(),
        }
    }

    pub fn local(mut self) -> Self {
        self.filters.push(InstanceFilter::Local);
        self
    }

    pub fn not_local(mut self) -> Self {
        self.filters.push(InstanceFilter::NotLocal);
        self
    }

    pub fn leader(mut self) -> Self {
        self.filters.push(InstanceFilter::Leader);
        self
    }

    pub fn not_leader(mut self) -> Self {
        self.filters.push(InstanceFilter::NotLeader);
        self
    }

    /// Keeps instances of the given cluster grouping. `None` adds no filter.
    pub fn in_cluster(
        mut self,
        cluster_id: Option<&str>,
    ) -> Self {
        if let Some(id) = cluster_id {
            self.filters.push(InstanceFilter::InCluster(id.to_string()));
        }
        self
    }

    /// Drops instances of the given cluster grouping. `None` adds no filter.
    pub fn not_in_cluster(
        mut self,
        cluster_id: Option<&str>,
    ) -> Self {
        if let Some(id) = cluster_id {
            self.filters.push(InstanceFilter::NotInCluster(id.to_string()));
        }
        self
    }

    /// Descriptions passing all filters, ordered by instance id
    pub fn get(&self) -> Vec<&'a InstanceDescription> {
        self.instances
            .values()
            .filter(|i| self.filters.iter().all(|f| f.accept(i)))
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.get().is_empty()
    }
}

/// True when `new_view` has the same membership as `old_view` and only
/// instance properties differ. Equal views are not a properties diff.
pub fn is_properties_diff(
    old_view: &TopologyView,
    new_view: &TopologyView,
) -> bool {
    if old_view.instance_count() != new_view.instance_count() {
        return false;
    }
    if old_view == new_view {
        return false;
    }
    old_view.instances().all(|old| new_view.contains(&old.instance_id))
}

/// True when an instance of the new view's local cluster grouping was part
/// of `old_view` but is missing from `new_view`.
pub fn any_instance_left_local_cluster(
    old_view: &TopologyView,
    new_view: &TopologyView,
) -> bool {
    !InstancesDiff::new(old_view, new_view)
        .removed()
        .in_cluster(new_view.local_cluster_id())
        .is_empty()
}
