//! Operation queues.
//!
//! An [`OperationQueue`] runs [`AsyncOperation`]s on a fixed set of worker
//! threads. A worker takes the next operation in submission order, starts it,
//! and then waits for the operation's finished flag before taking another,
//! so an operation whose work completes asynchronously keeps its slot until
//! it calls `finish`.
//!
//! A queue with a single worker is serial: its operations run one at a time,
//! in the order they were added.

use crate::error::{DispatchError, DispatchResult};
use crate::operation::AsyncOperation;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, trace};

#[derive(Default)]
struct QueueState {
    queued: VecDeque<Arc<dyn AsyncOperation>>,
    in_flight: Vec<Arc<dyn AsyncOperation>>,
    closed: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }
}

struct QueueShared {
    state: Mutex<QueueState>,
    work_cv: Condvar,
    idle_cv: Condvar,
}

/// A FIFO scheduler for asynchronous operations.
pub struct OperationQueue {
    name: String,
    max_concurrent: usize,
    shared: Arc<QueueShared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl OperationQueue {
    /// Creates a queue that runs up to `max_concurrent` operations at once.
    ///
    /// A width of zero is treated as one.
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> DispatchResult<Self> {
        Self::with_thread_prefix(name, max_concurrent, "storeflow")
    }

    /// Creates a serial queue.
    pub fn serial(name: impl Into<String>) -> DispatchResult<Self> {
        Self::new(name, 1)
    }

    /// Creates a queue whose worker threads are named `{prefix}-{name}-{n}`.
    pub fn with_thread_prefix(
        name: impl Into<String>,
        max_concurrent: usize,
        prefix: &str,
    ) -> DispatchResult<Self> {
        let name = name.into();
        let max_concurrent = max_concurrent.max(1);
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueState::default()),
            work_cv: Condvar::new(),
            idle_cv: Condvar::new(),
        });

        let mut workers = Vec::with_capacity(max_concurrent);
        for index in 0..max_concurrent {
            let shared = Arc::clone(&shared);
            let queue_name = name.clone();
            let handle = thread::Builder::new()
                .name(format!("{prefix}-{name}-{index}"))
                .spawn(move || worker_loop(&queue_name, &shared))?;
            workers.push(handle);
        }
        debug!(queue = %name, workers = max_concurrent, "operation queue created");

        Ok(Self {
            name,
            max_concurrent,
            shared,
            workers: Mutex::new(workers),
        })
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the maximum number of operations running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Returns true if at most one operation runs at a time.
    pub fn is_serial(&self) -> bool {
        self.max_concurrent == 1
    }

    /// Returns true once the queue stopped accepting operations.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Appends an operation to the queue.
    pub fn add_operation(&self, operation: Arc<dyn AsyncOperation>) -> DispatchResult<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(DispatchError::queue_closed(&self.name));
        }
        state.queued.push_back(operation);
        trace!(queue = %self.name, queued = state.queued.len(), "operation added");
        self.shared.work_cv.notify_one();
        Ok(())
    }

    /// Returns the number of queued and executing operations.
    pub fn operation_count(&self) -> usize {
        let state = self.shared.state.lock();
        state.queued.len() + state.in_flight.len()
    }

    /// Cancels every queued and executing operation.
    ///
    /// Queued operations still get started so they can observe the flag and
    /// finish.
    pub fn cancel_all_operations(&self) {
        let state = self.shared.state.lock();
        for operation in state.queued.iter().chain(state.in_flight.iter()) {
            operation.cancel();
        }
        debug!(queue = %self.name, "cancelled all operations");
    }

    /// Blocks until the queue has no queued or executing operations.
    pub fn wait_until_all_operations_are_finished(&self) {
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            self.shared.idle_cv.wait(&mut state);
        }
    }

    /// Stops accepting operations, drains what is already queued and joins
    /// the workers.
    ///
    /// Called from one of this queue's own workers, the join is skipped.
    pub fn shutdown(&self) {
        self.close();
        let current = thread::current().id();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
        debug!(queue = %self.name, "operation queue shut down");
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.work_cv.notify_all();
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.name)
            .field("max_concurrent", &self.max_concurrent)
            .field("operations", &self.operation_count())
            .finish()
    }
}

fn worker_loop(name: &str, shared: &QueueShared) {
    loop {
        let operation = {
            let mut state = shared.state.lock();
            loop {
                if let Some(operation) = state.queued.pop_front() {
                    state.in_flight.push(Arc::clone(&operation));
                    break operation;
                }
                if state.closed {
                    return;
                }
                shared.work_cv.wait(&mut state);
            }
        };

        let started = Arc::clone(&operation);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || started.start())) {
            error!(queue = %name, "operation panicked: {}", panic_message(&*payload));
            if !operation.is_finished() {
                operation.finish();
            }
        }
        operation.core().wait_until_finished();

        let mut state = shared.state.lock();
        state.in_flight.retain(|op| !Arc::ptr_eq(op, &operation));
        if state.is_idle() {
            shared.idle_cv.notify_all();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic)")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::BlockOperation;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn serial_queue_preserves_order() {
        let queue = OperationQueue::serial("ordered").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..20 {
            let log = Arc::clone(&log);
            queue
                .add_operation(BlockOperation::new(move || {
                    // Earlier operations sleep longer; order must still hold.
                    thread::sleep(Duration::from_millis((20 - i) / 4));
                    log.lock().push(i);
                }))
                .unwrap();
        }
        queue.wait_until_all_operations_are_finished();

        assert_eq!(*log.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn serial_queue_never_overlaps() {
        let queue = OperationQueue::serial("exclusive").unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            queue
                .add_operation(BlockOperation::new(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        queue.wait_until_all_operations_are_finished();

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn concurrent_queue_runs_in_parallel() {
        let queue = OperationQueue::new("wide", 4).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            queue
                .add_operation(BlockOperation::new(move || {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(30));
                    running.fetch_sub(1, Ordering::SeqCst);
                }))
                .unwrap();
        }
        queue.wait_until_all_operations_are_finished();

        let max = max_seen.load(Ordering::SeqCst);
        assert!(max > 1, "expected parallel execution, saw {max}");
        assert!(max <= 4);
    }

    #[test]
    fn closed_queue_rejects_operations() {
        let queue = OperationQueue::serial("closing").unwrap();
        queue.shutdown();

        assert!(queue.is_closed());
        let err = queue.add_operation(BlockOperation::new(|| {})).unwrap_err();
        assert!(matches!(err, DispatchError::QueueClosed { .. }));
    }

    #[test]
    fn shutdown_drains_queued_operations() {
        let queue = OperationQueue::serial("drain").unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..5 {
            let count = Arc::clone(&count);
            queue
                .add_operation(BlockOperation::new(move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        queue.shutdown();

        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(queue.operation_count(), 0);
    }

    #[test]
    fn cancel_all_skips_queued_work() {
        let queue = OperationQueue::serial("cancel").unwrap();
        let gate = Arc::new((Mutex::new(false), Condvar::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        let blocker_gate = Arc::clone(&gate);
        queue
            .add_operation(BlockOperation::new(move || {
                let (open, cv) = &*blocker_gate;
                let mut open = open.lock();
                while !*open {
                    cv.wait(&mut open);
                }
            }))
            .unwrap();
        for _ in 0..3 {
            let ran = Arc::clone(&ran);
            queue
                .add_operation(BlockOperation::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        queue.cancel_all_operations();
        {
            let (open, cv) = &*gate;
            *open.lock() = true;
            cv.notify_all();
        }
        queue.wait_until_all_operations_are_finished();

        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_operation_does_not_wedge_serial_queue() {
        let queue = OperationQueue::serial("panics").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));

        let first = BlockOperation::new(|| panic!("boom"));
        queue.add_operation(Arc::clone(&first) as Arc<dyn AsyncOperation>).unwrap();
        let counter = Arc::clone(&ran);
        queue
            .add_operation(BlockOperation::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        queue.wait_until_all_operations_are_finished();

        assert!(first.is_finished());
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(queue.operation_count(), 0);
    }

    #[test]
    fn zero_width_is_serial() {
        let queue = OperationQueue::new("zero", 0).unwrap();
        assert!(queue.is_serial());
        assert_eq!(queue.name(), "zero");
    }
}
