// -
// Background task names (used in logs only)

pub(crate) const ASYNC_EVENT_SENDER_NAME: &str = "discovery-async-event-sender";
pub(crate) const MIN_EVENT_DELAY_NAME: &str = "discovery-min-event-delay";

// -
// Configuration

/// Environment variable naming an extra configuration file
pub(crate) const CONFIG_PATH_ENV: &str = "DISCOVERY_CONFIG_PATH";
/// Prefix of environment overrides, e.g. `DISCOVERY__VIEW_STATE__MIN_EVENT_DELAY_SECS`
pub(crate) const CONFIG_ENV_PREFIX: &str = "DISCOVERY";

pub(crate) const DEFAULT_MIN_EVENT_DELAY_SECS: u64 = 3;
pub(crate) const DEFAULT_DISPATCHER_FAULT_BACKOFF_MS: u64 = 5000;
pub(crate) const DEFAULT_ASYNC_EVENTS_POLL_INTERVAL_MS: u64 = 50;
