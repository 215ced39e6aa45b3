//! Background delivery of topology events.
//!
//! Events are pushed onto an unbounded channel by the state machine (while it
//! holds its lock) and drained by a single tokio task, so listener code never
//! runs under the state lock. Per-producer FIFO order is preserved.
//!
//! Each delivery runs on the blocking pool and is awaited before the next one
//! starts: a slow listener holds up later events but never a runtime worker.
//!
//! Stopping closes the channel: events accepted before `flush_then_stop` are
//! still delivered, then the worker exits.

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::ListenerHandle;
use crate::constants::ASYNC_EVENT_SENDER_NAME;
use crate::Error;
use crate::Result;
use crate::TopologyEvent;

/// Unit of work of the sender: one event for one listener
#[derive(Debug)]
pub(crate) struct AsyncEvent {
    pub(crate) listener: ListenerHandle,
    pub(crate) event: TopologyEvent,
}

pub(crate) struct AsyncEventSender {
    sender: Mutex<Option<mpsc::UnboundedSender<AsyncEvent>>>,
    /// queued + currently being delivered
    in_flight: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

impl AsyncEventSender {
    /// Spawns the worker on `runtime`.
    ///
    /// `in_flight` is owned by the caller so that events still draining after
    /// a stop remain visible. `fault_backoff` is the pause applied after an
    /// unexpected fault of the worker itself (a delivery that could not run to
    /// completion) before it resumes. Listener errors and panics are only logged.
    pub(crate) fn start(
        runtime: &Handle,
        fault_backoff: Duration,
        in_flight: Arc<AtomicUsize>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = runtime.spawn(Self::run(rx, in_flight.clone(), fault_backoff));
        debug!("{} started", ASYNC_EVENT_SENDER_NAME);
        Self {
            sender: Mutex::new(Some(tx)),
            in_flight,
            worker,
        }
    }

    /// Appends an event to the queue. Never blocks.
    pub(crate) fn enqueue(
        &self,
        listener: ListenerHandle,
        event: TopologyEvent,
    ) -> Result<()> {
        let guard = self.sender.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(Error::DispatcherStopped);
        };
        trace!("enqueue: {} to {:?}", event, listener);
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if tx.send(AsyncEvent { listener, event }).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::DispatcherStopped);
        }
        Ok(())
    }

    /// Stops accepting events. Everything already queued is still delivered
    /// before the worker terminates.
    pub(crate) fn flush_then_stop(&self) {
        if self.sender.lock().take().is_some() {
            debug!(
                "{}: flush_then_stop, {} event(s) still in flight (worker finished: {})",
                ASYNC_EVENT_SENDER_NAME,
                self.in_flight_event_count(),
                self.worker.is_finished()
            );
        }
    }

    pub(crate) fn in_flight_event_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub(crate) fn has_in_flight_event(&self) -> bool {
        self.in_flight_event_count() > 0
    }

    /// Whether the worker task has terminated
    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<AsyncEvent>,
        in_flight: Arc<AtomicUsize>,
        fault_backoff: Duration,
    ) {
        while let Some(AsyncEvent { listener, event }) = rx.recv().await {
            trace!("{}: delivering {} to {:?}", ASYNC_EVENT_SENDER_NAME, event, listener);
            let delivery = {
                let listener = listener.clone();
                let event = event.clone();
                tokio::task::spawn_blocking(move || listener.handle_topology_event(&event))
            };
            let outcome = delivery.await;
            in_flight.fetch_sub(1, Ordering::AcqRel);

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("{:?} failed to handle {}: {:?}", listener, event, e);
                }
                Err(e) if e.is_panic() => {
                    error!("{:?} panicked while handling {}", listener, event);
                }
                Err(e) => {
                    error!(
                        "{}: unexpected fault while delivering {} to {:?}: {:?}, pausing {:?}",
                        ASYNC_EVENT_SENDER_NAME, event, listener, e, fault_backoff
                    );
                    tokio::time::sleep(fault_backoff).await;
                }
            }
        }
        debug!("{} stopped", ASYNC_EVENT_SENDER_NAME);
    }
}
