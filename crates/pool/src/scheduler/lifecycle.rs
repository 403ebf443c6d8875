use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info};
use workhorse_core::{PoolError, PoolResult};

use super::state::{PoolState, WorkerSlot};
use super::Shared;
use crate::worker::{EventReceiver, WorkerId};

impl<A, R> Shared<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    /// Create the worker set on first use. Idempotent.
    ///
    /// Validation happens here rather than at construction, so a bad size
    /// surfaces on the first submission.
    pub(super) fn provision_locked(
        self: &Arc<Self>,
        state: &mut PoolState<A, R>,
    ) -> PoolResult<()> {
        if state.is_provisioned() {
            return Ok(());
        }
        self.config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            PoolError::Configuration(
                "worker pool must be provisioned inside a Tokio runtime".to_string(),
            )
        })?;

        let size = self.config.resolved_size();
        let source = self
            .packager
            .package(Arc::clone(&self.task), &self.config.dependencies)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut workers = BTreeMap::new();
        for index in 0..size {
            match source.spawn(WorkerId(index), events_tx.clone()) {
                Ok(handle) => {
                    workers.insert(handle.id(), WorkerSlot::idle(handle));
                }
                Err(e) => {
                    for slot in workers.values_mut() {
                        slot.handle.terminate();
                    }
                    self.packager.dispose(source.as_ref());
                    return Err(e);
                }
            }
        }

        // Reversed so that `pop` hands out worker-0 first.
        state.free = workers.keys().rev().copied().collect();
        state.workers = workers;
        state.source = Some(source);
        state.events = Some(events_tx);
        state.event_loop = Some(runtime.spawn(event_loop(Arc::downgrade(self), events_rx)));
        state.runtime = Some(runtime);

        info!(pool = %self.config.name, size, "worker pool provisioned");
        Ok(())
    }

    /// Terminate every worker, reject outstanding tasks with `PoolCleared`
    /// and release the packaged source. Safe to call repeatedly.
    pub(super) fn teardown(&self) {
        let (source, cleared) = {
            let mut state = self.state();
            let before = state.metrics.cleared;
            let source = state.teardown();
            (source, state.metrics.cleared - before)
        };

        if let Some(source) = source {
            self.packager.dispose(source.as_ref());
            info!(pool = %self.config.name, cleared, "worker pool torn down");
        }
    }
}

/// Applies worker outcomes one at a time until every sender is gone or the
/// pool is dropped.
async fn event_loop<A, R>(shared: Weak<Shared<A, R>>, mut events: EventReceiver<R>)
where
    A: Send + 'static,
    R: Send + 'static,
{
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.state().handle_event(event);
    }
    debug!("worker event loop finished");
}
