use std::fmt;
use std::sync::Arc;

use super::TopologyView;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopologyEventType {
    /// First event a listener receives, carries the current view
    TopologyInit,
    /// The announced view is being superseded, carries that (old) view
    TopologyChanging,
    /// Membership changed, carries old and new view
    TopologyChanged,
    /// Only instance properties changed, carries old and new view
    PropertiesChanged,
}

impl fmt::Display for TopologyEventType {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let s = match self {
            TopologyEventType::TopologyInit => "TOPOLOGY_INIT",
            TopologyEventType::TopologyChanging => "TOPOLOGY_CHANGING",
            TopologyEventType::TopologyChanged => "TOPOLOGY_CHANGED",
            TopologyEventType::PropertiesChanged => "PROPERTIES_CHANGED",
        };
        f.write_str(s)
    }
}

/// Immutable topology event delivered to listeners.
///
/// Equality compares the kind and the views by value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyEvent {
    event_type: TopologyEventType,
    old_view: Option<Arc<TopologyView>>,
    new_view: Option<Arc<TopologyView>>,
}

impl TopologyEvent {
    pub fn init(view: Arc<TopologyView>) -> Self {
        Self {
            event_type: TopologyEventType::TopologyInit,
            old_view: None,
            new_view: Some(view),
        }
    }

    pub fn changing(old_view: Arc<TopologyView>) -> Self {
        Self {
            event_type: TopologyEventType::TopologyChanging,
            old_view: Some(old_view),
            new_view: None,
        }
    }

    pub fn changed(
        old_view: Arc<TopologyView>,
        new_view: Arc<TopologyView>,
    ) -> Self {
        Self {
            event_type: TopologyEventType::TopologyChanged,
            old_view: Some(old_view),
            new_view: Some(new_view),
        }
    }

    pub fn properties_changed(
        old_view: Arc<TopologyView>,
        new_view: Arc<TopologyView>,
    ) -> Self {
        Self {
            event_type: TopologyEventType::PropertiesChanged,
            old_view: Some(old_view),
            new_view: Some(new_view),
        }
    }

    pub fn event_type(&self) -> TopologyEventType {
        self.event_type
    }

    pub fn old_view(&self) -> Option<&Arc<TopologyView>> {
        self.old_view.as_ref()
    }

    pub fn new_view(&self) -> Option<&Arc<TopologyView>> {
        self.new_view.as_ref()
    }
}

impl fmt::Display for TopologyEvent {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.event_type)?;
        if let Some(old) = &self.old_view {
            write!(f, ", old: [{}]", old.instance_ids())?;
        }
        if let Some(new) = &self.new_view {
            write!(f, ", new: [{}]", new.instance_ids())?;
        }
        Ok(())
    }
}
