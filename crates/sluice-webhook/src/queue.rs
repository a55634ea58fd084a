//! Bounded queue and worker pool for asynchronous mode.
//!
//! Each accepted batch holds one of `capacity` slots until its handler call
//! returns, so the capacity bounds batches that are queued *or* being
//! handled. [`WorkerPool::enqueue`] never waits: a full queue is reported to
//! the caller, which answers 429.
//!
//! Workers share one receiver and prefer queued batches over the stop
//! signal, so every batch accepted before [`WorkerPool::close`] is handed to
//! the handler before [`WorkerPool::join`] returns. A handler that panics
//! is logged like a handler error and the worker moves on to the next batch.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::handler::RecordHandler;
use crate::shutdown::ShutdownSignal;
use crate::Record;

/// A queued batch and the slot it occupies.
struct Job {
    records: Vec<Record>,
    slot: OwnedSemaphorePermit,
}

/// Fixed-capacity queue drained by a fixed number of workers.
#[derive(Debug)]
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    slots: Arc<Semaphore>,
    capacity: usize,
    stop: ShutdownSignal,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("records", &self.records.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Creates the queue and spawns `workers` worker tasks.
    ///
    /// A zero capacity or worker count is raised to one. Must be called from
    /// within a Tokio runtime.
    pub fn start(capacity: usize, workers: usize, handler: RecordHandler) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        let workers = workers.max(1);

        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let stop = ShutdownSignal::new();

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    Arc::clone(&receiver),
                    stop.clone(),
                    Arc::clone(&handler),
                ))
            })
            .collect();

        tracing::debug!(queue_size = capacity, workers, "webhook workers started");

        Self {
            sender: Mutex::new(Some(sender)),
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            stop,
            workers: Mutex::new(handles),
        }
    }

    /// Offers a batch without waiting. Returns `false` if the queue is full
    /// or closed.
    pub fn enqueue(&self, records: Vec<Record>) -> bool {
        let Ok(slot) = Arc::clone(&self.slots).try_acquire_owned() else {
            return false;
        };

        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.try_send(Job { records, slot }).is_ok(),
            None => false,
        }
    }

    /// Queue capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Batches queued or being handled.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Closes the queue and signals the workers to stop once it is drained.
    ///
    /// Calling it again does nothing.
    pub fn close(&self) {
        let sender = self.sender.lock().take();
        if sender.is_some() {
            self.stop.trigger();
            tracing::debug!(pending = self.pending(), "webhook queue closed");
        }
    }

    /// Waits for every worker to exit. Call [`close`](Self::close) first.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "webhook worker terminated abnormally");
            }
        }
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    stop: ShutdownSignal,
    handler: RecordHandler,
) {
    let stopped = stop.recv();
    tokio::pin!(stopped);

    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                job = receiver.recv() => job,
                () = &mut stopped => None,
            }
        };

        let Some(Job { records, slot }) = job else {
            break;
        };

        let record_count = records.len();
        let outcome = AssertUnwindSafe(async { handler(records).await })
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    worker = id,
                    error = %e,
                    record_count,
                    "webhook handler returned error"
                );
            }
            Err(panic) => {
                tracing::error!(
                    worker = id,
                    panic = panic_message(panic.as_ref()),
                    record_count,
                    "webhook handler panicked"
                );
            }
        }
        drop(slot);
    }

    tracing::debug!(worker = id, "webhook worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn record(id: i64) -> Record {
        json!({ "id": id }).as_object().cloned().unwrap()
    }

    fn counting_handler(seen: Arc<AtomicUsize>) -> RecordHandler {
        handler_fn(move |records: Vec<Record>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(records.len(), Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn test_enqueue_and_drain() {
        let seen = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::start(8, 2, counting_handler(Arc::clone(&seen)));

        assert!(pool.enqueue(vec![record(1), record(2)]));
        assert!(pool.enqueue(vec![record(3)]));

        pool.close();
        pool.join().await;

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(pool.pending(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_waiting() {
        let release = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        let handler = {
            let release = Arc::clone(&release);
            let started = Arc::clone(&started);
            handler_fn(move |_records: Vec<Record>| {
                let release = Arc::clone(&release);
                let started = Arc::clone(&started);
                async move {
                    started.notify_one();
                    release.notified().await;
                    Ok(())
                }
            })
        };
        let pool = WorkerPool::start(1, 1, handler);

        assert!(pool.enqueue(vec![record(1)]));
        started.notified().await;

        // The slot is still held while the handler runs.
        assert_eq!(pool.pending(), 1);
        assert!(!pool.enqueue(vec![record(2)]));

        release.notify_one();
        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot should be released");
        assert!(pool.enqueue(vec![record(3)]));
        started.notified().await;
        release.notify_one();

        pool.close();
        pool.join().await;
    }

    #[tokio::test]
    async fn test_close_drains_queued_batches() {
        let seen = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let handler = {
            let seen = Arc::clone(&seen);
            let gate = Arc::clone(&gate);
            handler_fn(move |records: Vec<Record>| {
                let seen = Arc::clone(&seen);
                let gate = Arc::clone(&gate);
                async move {
                    gate.acquire().await.map(|permit| permit.forget()).ok();
                    seen.fetch_add(records.len(), Ordering::SeqCst);
                    Ok(())
                }
            })
        };
        let pool = WorkerPool::start(4, 1, handler);

        for id in 0..4 {
            assert!(pool.enqueue(vec![record(id)]));
        }
        pool.close();
        assert!(pool.is_closed());
        assert!(!pool.enqueue(vec![record(9)]));

        gate.add_permits(4);
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("workers should drain and exit");
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_handler_errors_do_not_stop_workers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            handler_fn(move |_records: Vec<Record>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(crate::HandlerError::from("downstream unavailable"))
                }
            })
        };
        let pool = WorkerPool::start(4, 1, handler);

        assert!(pool.enqueue(vec![record(1)]));
        assert!(pool.enqueue(vec![record(2)]));
        pool.close();
        pool.join().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handler_panic_does_not_stop_worker() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = {
            let calls = Arc::clone(&calls);
            handler_fn(move |records: Vec<Record>| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if records[0].get("id") == Some(&json!(1)) {
                        panic!("handler bug");
                    }
                    Ok(())
                }
            })
        };
        let pool = WorkerPool::start(1, 1, handler);

        assert!(pool.enqueue(vec![record(1)]));
        tokio::time::timeout(Duration::from_secs(1), async {
            while pool.pending() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("slot should be released after a panic");

        // The single worker is still alive and handles the next batch.
        assert!(pool.enqueue(vec![record(2)]));
        pool.close();
        tokio::time::timeout(Duration::from_secs(1), pool.join())
            .await
            .expect("worker should drain and exit");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let pool = WorkerPool::start(2, 3, counting_handler(Arc::new(AtomicUsize::new(0))));
        pool.close();
        pool.close();
        pool.join().await;
        pool.join().await;
        assert!(pool.is_closed());
    }

    #[tokio::test]
    async fn test_zero_sizes_are_raised() {
        let pool = WorkerPool::start(0, 0, counting_handler(Arc::new(AtomicUsize::new(0))));
        assert_eq!(pool.capacity(), 1);
        pool.close();
        pool.join().await;
    }
}
