//! Dispatch workers: one serial task per check id, fed by a bounded channel
//!
//! Actions for the same check are written strictly in submission order;
//! different checks proceed in parallel. Workers are spawned lazily on the
//! first action for their check.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::response::{DispatchError, DispatchTally, Dispatcher};
use crate::types::{BoundsTable, CheckEvent, CheckId};

// ============================================================================
// Worker Pool Handle
// ============================================================================

/// Owner of the per-check dispatch workers.
pub struct DispatchWorkers {
    dispatcher: Dispatcher,
    bounds: Arc<BoundsTable>,
    capacity: usize,
    senders: HashMap<CheckId, mpsc::Sender<CheckEvent>>,
    tasks: JoinSet<(CheckId, DispatchTally)>,
}

impl DispatchWorkers {
    pub fn new(dispatcher: Dispatcher, bounds: Arc<BoundsTable>, capacity: usize) -> Self {
        Self {
            dispatcher,
            bounds,
            capacity: capacity.max(1),
            senders: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    /// Queue an admitted event on its check's worker.
    ///
    /// Waits while that worker's queue is full.
    pub async fn submit(&mut self, event: CheckEvent) -> Result<(), DispatchError> {
        let check_id = event.check_id.clone();
        let tx = self.sender_for(&check_id);
        tx.send(event)
            .await
            .map_err(|_| DispatchError::WorkerClosed(check_id))
    }

    /// Number of workers spawned so far.
    pub fn active_workers(&self) -> usize {
        self.senders.len()
    }

    fn sender_for(&mut self, check_id: &str) -> mpsc::Sender<CheckEvent> {
        if let Some(tx) = self.senders.get(check_id) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let worker = CheckWorker {
            check_id: check_id.to_string(),
            dispatcher: self.dispatcher.clone(),
            bounds: Arc::clone(&self.bounds),
            rx,
        };
        self.tasks.spawn(worker.run());
        self.senders.insert(check_id.to_string(), tx.clone());
        debug!(check_id, "Spawned dispatch worker");
        tx
    }

    /// Close every queue and wait up to `grace` for queued writes to finish.
    ///
    /// Workers still running after `grace` are aborted; their unfinished
    /// writes are not counted.
    pub async fn shutdown(mut self, grace: Duration) -> DispatchTally {
        self.senders.clear();

        let mut total = DispatchTally::default();
        let drained = tokio::time::timeout(grace, drain(&mut self.tasks, &mut total)).await;
        if drained.is_err() {
            warn!(
                remaining = self.tasks.len(),
                grace_ms = grace.as_millis(),
                "Dispatch workers did not finish within grace period, aborting"
            );
            self.tasks.abort_all();
            while self.tasks.join_next().await.is_some() {}
        }
        total
    }
}

async fn drain(tasks: &mut JoinSet<(CheckId, DispatchTally)>, total: &mut DispatchTally) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((check_id, tally)) => {
                debug!(check_id = %check_id, written = tally.written, failed = tally.failed, "Dispatch worker finished");
                total.merge(tally);
            }
            Err(e) => warn!(error = %e, "Dispatch worker panicked"),
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct CheckWorker {
    check_id: CheckId,
    dispatcher: Dispatcher,
    bounds: Arc<BoundsTable>,
    rx: mpsc::Receiver<CheckEvent>,
}

impl CheckWorker {
    async fn run(mut self) -> (CheckId, DispatchTally) {
        info!(check_id = %self.check_id, "Dispatch worker starting");
        let mut tally = DispatchTally::default();

        while let Some(event) = self.rx.recv().await {
            let outcome = self.dispatcher.dispatch_one(&event, &self.bounds).await;
            tally.record(&outcome);
        }

        info!(check_id = %self.check_id, written = tally.written, "Dispatch worker stopped");
        (self.check_id, tally)
    }
}
