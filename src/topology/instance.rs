use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Describes one instance participating in the topology.
///
/// Identity is `instance_id`; two descriptions with the same id denote the
/// same instance, possibly with different properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,

    /// Id of the cluster grouping this instance belongs to
    pub cluster_id: String,

    /// Whether this is the instance hosting the view state manager
    #[serde(default)]
    pub is_local: bool,

    #[serde(default)]
    pub is_leader: bool,

    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl InstanceDescription {
    pub fn new(
        instance_id: impl Into<String>,
        cluster_id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            cluster_id: cluster_id.into(),
            is_local: false,
            is_leader: false,
            properties: BTreeMap::new(),
        }
    }

    pub fn local(mut self) -> Self {
        self.is_local = true;
        self
    }

    pub fn leader(mut self) -> Self {
        self.is_leader = true;
        self
    }

    pub fn with_property(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn property(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }
}
