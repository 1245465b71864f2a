// background.rs - Bounded pool for fire-and-forget decision telemetry.
//
// Trace persistence, reputation updates and audit appends run here so the
// decision path never waits on them. Submission never blocks: when the queue
// is full the task is dropped, counted and logged. `shutdown` closes the
// queue and waits for workers to finish whatever is already queued.
//
// Tasks are synchronous closures (sinks may do file I/O), so each one runs
// on tokio's blocking pool.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use crate::metrics::DecisionMetrics;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub struct BackgroundPool {
    sender: Mutex<Option<mpsc::Sender<(&'static str, Task)>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<DecisionMetrics>,
}

impl BackgroundPool {
    /// Start `workers` worker tasks behind a queue of `queue` slots. Zero
    /// values are raised to 1. Must be called inside a tokio runtime.
    pub fn new(workers: usize, queue: usize, metrics: Arc<DecisionMetrics>) -> Self {
        let (tx, rx) = mpsc::channel::<(&'static str, Task)>(queue.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                tokio::spawn(async move {
                    loop {
                        let next = rx.lock().await.recv().await;
                        let Some((kind, task)) = next else { break };
                        if let Err(e) = tokio::task::spawn_blocking(task).await {
                            tracing::warn!(worker, kind, error = %e, "background task panicked");
                        }
                    }
                    tracing::debug!(worker, "background worker stopped");
                })
            })
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            metrics,
        }
    }

    /// Queue a task. Returns false when it was dropped (queue full or pool
    /// shut down).
    pub fn submit(&self, kind: &'static str, task: Task) -> bool {
        let sender = self.sender.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = sender.as_ref() else {
            self.metrics.record_dropped_task();
            tracing::debug!(kind, "background pool shut down; task dropped");
            return false;
        };
        match tx.try_send((kind, task)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_dropped_task();
                tracing::warn!(kind, "background queue full; task dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_dropped_task();
                tracing::debug!(kind, "background queue closed; task dropped");
                false
            }
        }
    }

    /// Close the queue and wait until every queued task has run.
    pub async fn shutdown(&self) {
        drop(self.sender.lock().unwrap_or_else(|e| e.into_inner()).take());
        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background worker failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[tokio::test]
    async fn shutdown_drains_queued_tasks() {
        let metrics = Arc::new(DecisionMetrics::new());
        let pool = BackgroundPool::new(2, 16, Arc::clone(&metrics));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            assert!(pool.submit("count", Box::new(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pool.shutdown().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert_eq!(metrics.snapshot().dropped_tasks, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_queue_drops_instead_of_blocking() {
        let metrics = Arc::new(DecisionMetrics::new());
        let pool = BackgroundPool::new(1, 1, Arc::clone(&metrics));

        // Park the only worker so the queue backs up.
        let gate = Arc::new(Barrier::new(2));
        let held = Arc::clone(&gate);
        assert!(pool.submit("park", Box::new(move || {
            held.wait();
        })));
        // Wait until the worker has taken the parking task off the queue.
        let mut accepted = 0;
        for _ in 0..200 {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            if pool.submit("fill", Box::new(|| {})) {
                accepted += 1;
                break;
            }
        }
        assert_eq!(accepted, 1);

        let dropped = (0..5).filter(|_| !pool.submit("extra", Box::new(|| {}))).count();
        assert_eq!(dropped, 5);

        gate.wait();
        pool.shutdown().await;
        assert!(metrics.snapshot().dropped_tasks >= 5);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_dropped() {
        let metrics = Arc::new(DecisionMetrics::new());
        let pool = BackgroundPool::new(1, 4, Arc::clone(&metrics));
        pool.shutdown().await;
        assert!(!pool.submit("late", Box::new(|| {})));
        assert_eq!(metrics.snapshot().dropped_tasks, 1);
        // A second shutdown is a no-op.
        pool.shutdown().await;
    }
}
