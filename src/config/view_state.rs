use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::DEFAULT_ASYNC_EVENTS_POLL_INTERVAL_MS;
use crate::constants::DEFAULT_DISPATCHER_FAULT_BACKOFF_MS;
use crate::constants::DEFAULT_MIN_EVENT_DELAY_SECS;
use crate::Error;
use crate::Result;

/// Timing parameters of the view state manager and its helpers
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ViewStateConfig {
    /// Minimum delay (seconds) between a topology stabilizing and the
    /// TOPOLOGY_CHANGED event being sent. Absorbs flapping. 0 disables delaying.
    #[serde(default = "default_min_event_delay_secs")]
    pub min_event_delay_secs: u64,

    /// Pause (milliseconds) of the async event sender after an unexpected fault
    #[serde(default = "default_dispatcher_fault_backoff_ms")]
    pub dispatcher_fault_backoff_ms: u64,

    /// Poll period (milliseconds) used by `wait_for_async_events`
    #[serde(default = "default_async_events_poll_interval_ms")]
    pub async_events_poll_interval_ms: u64,
}

impl Default for ViewStateConfig {
    fn default() -> Self {
        Self {
            min_event_delay_secs: default_min_event_delay_secs(),
            dispatcher_fault_backoff_ms: default_dispatcher_fault_backoff_ms(),
            async_events_poll_interval_ms: default_async_events_poll_interval_ms(),
        }
    }
}

impl ViewStateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.dispatcher_fault_backoff_ms == 0 {
            return Err(Error::InvalidConfig(
                "dispatcher_fault_backoff_ms must be greater than 0".into(),
            ));
        }
        if self.async_events_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "async_events_poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// `None` when event delaying is disabled
    pub fn min_event_delay(&self) -> Option<Duration> {
        if self.min_event_delay_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.min_event_delay_secs))
        }
    }

    pub fn dispatcher_fault_backoff(&self) -> Duration {
        Duration::from_millis(self.dispatcher_fault_backoff_ms)
    }

    pub fn async_events_poll_interval(&self) -> Duration {
        Duration::from_millis(self.async_events_poll_interval_ms)
    }
}

fn default_min_event_delay_secs() -> u64 {
    DEFAULT_MIN_EVENT_DELAY_SECS
}
fn default_dispatcher_fault_backoff_ms() -> u64 {
    DEFAULT_DISPATCHER_FAULT_BACKOFF_MS
}
fn default_async_events_poll_interval_ms() -> u64 {
    DEFAULT_ASYNC_EVENTS_POLL_INTERVAL_MS
}
