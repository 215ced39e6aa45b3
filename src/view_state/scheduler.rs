use std::time::Duration;

use tokio::runtime::Handle;
use tracing::debug;
use tracing::trace;

use super::ScheduledTask;
use super::Scheduler;
use crate::Error;
use crate::Result;

/// [`Scheduler`] backed by a tokio runtime: each task is a spawned
/// `sleep(delay)` followed by the task body.
#[derive(Clone, Debug)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Uses the runtime the caller is running in
    pub fn try_current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::NoRuntime(e.to_string()))
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(
        &self,
        delay: Duration,
        task: ScheduledTask,
    ) -> bool {
        trace!("schedule_once: in {:?}", delay);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!("schedule_once: firing task after {:?}", delay);
            task();
        });
        true
    }
}
