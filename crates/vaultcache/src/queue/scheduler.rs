//! Scheduling triggers: idle interval, chunk size, explicit flush, and
//! shutdown drive when a drain happens.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use vaultcache_core::{CacheError, CacheMetrics};
use vaultcache_storage::StorageDriver;

use super::{coalesce, OperationQueue, PendingOp};

/// Default idle interval: a drain happens if anything has waited this long.
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(2);
/// Default chunk size: a drain happens once the queue reaches this length.
pub const DEFAULT_CHUNK_SIZE: usize = 64;
/// How often the scheduler wakes up to check trigger conditions. Trades a
/// little latency against the open-ended alternative of a condvar per
/// queue-state transition; bounded by `idle_interval`/`chunk_size` being
/// soft targets rather than hard real-time deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    pub idle_interval: Duration,
    pub chunk_size: usize,
    /// Soft backpressure limit (§5): `None` leaves the queue unbounded. A
    /// push past this depth is still accepted — it only logs a warning —
    /// since the writer's batching already provides throughput smoothing.
    pub max_queue_depth: Option<usize>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_interval: DEFAULT_IDLE_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_queue_depth: None,
        }
    }
}

enum ControlMsg {
    Flush(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

/// Owns the background task that drains, coalesces, and executes batches.
pub struct Scheduler {
    control_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl Scheduler {
    pub fn spawn(
        queue: Arc<OperationQueue>,
        storage: Arc<StorageDriver>,
        metrics: Arc<dyn CacheMetrics>,
        config: QueueConfig,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(queue, storage, metrics, config, control_rx));
        Self { control_tx }
    }

    /// Resolves after all operations enqueued at the moment of the call
    /// have been executed.
    pub async fn flush(&self) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        self.control_tx
            .send(ControlMsg::Flush(tx))
            .map_err(|_| CacheError::Disposed)?;
        rx.await.map_err(|_| CacheError::Disposed)
    }

    /// Drains remaining work and stops the background task. Idempotent:
    /// safe to call after the task has already exited.
    pub async fn shutdown(&self) -> Result<(), CacheError> {
        let (tx, rx) = oneshot::channel();
        if self.control_tx.send(ControlMsg::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }
}

async fn run(
    queue: Arc<OperationQueue>,
    storage: Arc<StorageDriver>,
    metrics: Arc<dyn CacheMetrics>,
    config: QueueConfig,
    mut control_rx: mpsc::UnboundedReceiver<ControlMsg>,
) {
    let mut pending_flush_acks: Vec<oneshot::Sender<()>> = Vec::new();

    loop {
        tokio::select! {
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
            msg = control_rx.recv() => {
                match msg {
                    Some(ControlMsg::Flush(ack)) => pending_flush_acks.push(ack),
                    Some(ControlMsg::Shutdown(ack)) => {
                        drain_and_execute(&queue, &storage, &metrics).await;
                        for a in pending_flush_acks.drain(..) {
                            let _ = a.send(());
                        }
                        let _ = ack.send(());
                        return;
                    }
                    None => return,
                }
            }
        }

        let should_drain = !pending_flush_acks.is_empty()
            || queue.len() >= config.chunk_size
            || past_idle_deadline(&queue, config.idle_interval);

        if should_drain {
            drain_and_execute(&queue, &storage, &metrics).await;
            for a in pending_flush_acks.drain(..) {
                let _ = a.send(());
            }
        }
    }
}

fn past_idle_deadline(queue: &OperationQueue, idle_interval: Duration) -> bool {
    queue
        .idle_deadline(idle_interval)
        .map(|deadline| Instant::now() >= deadline)
        .unwrap_or(false)
}

async fn drain_and_execute(
    queue: &Arc<OperationQueue>,
    storage: &Arc<StorageDriver>,
    metrics: &Arc<dyn CacheMetrics>,
) {
    let drained: Vec<PendingOp> = queue.drain();
    if drained.is_empty() {
        return;
    }
    let batch_size = drained.len();
    let (ops, fanout) = coalesce(drained);
    metrics.record_drain(batch_size, ops.len());

    match storage.execute(ops).await {
        Ok(outcomes) => {
            for (outcome, plan) in outcomes.into_iter().zip(fanout) {
                plan.dispatch(Ok(outcome));
            }
        }
        Err(e) => {
            for plan in fanout {
                plan.dispatch(Err(e.clone()));
            }
        }
    }
}
