//! Routing transactions to operation queues.
//!
//! The [`Dispatcher`] reads a transaction's [`DispatchStrategy`] and decides
//! where it runs:
//! - `Sync` runs on the caller, which blocks until the transaction is terminal
//! - `Async(None)` goes to the shared concurrent queue
//! - `Async(Some(name))` goes to the serial queue `name`, created on first use
//!
//! Transactions that do not spawn an operation (signposts) complete inline
//! through [`Transaction::run`] whatever their strategy.

use crate::config::DispatcherConfig;
use crate::error::{DispatchError, DispatchResult, TransactionError};
use crate::operation::AsyncOperation;
use crate::queue::OperationQueue;
use crate::strategy::DispatchStrategy;
use crate::transaction::{Transaction, TransactionOperation, TransactionState};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const CONCURRENT_QUEUE_NAME: &str = "concurrent";
const DISPATCHER_NAME: &str = "dispatcher";

/// Completion latch for transactions that run without an operation.
#[derive(Default)]
struct Latch {
    done: Mutex<bool>,
    cv: Condvar,
}

impl Latch {
    fn release(&self) {
        *self.done.lock() = true;
        self.cv.notify_all();
    }

    fn is_released(&self) -> bool {
        *self.done.lock()
    }

    fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cv.wait(&mut done);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            if self.cv.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

#[derive(Clone)]
enum Completion {
    Operation(Arc<dyn AsyncOperation>),
    Inline(Arc<Latch>),
}

/// A handle on a dispatched transaction.
#[derive(Clone)]
pub struct TransactionHandle {
    transaction: Arc<dyn Transaction>,
    completion: Completion,
}

impl TransactionHandle {
    /// The transaction id.
    pub fn id(&self) -> &str {
        self.transaction.id()
    }

    /// The dispatched transaction.
    pub fn transaction(&self) -> &Arc<dyn Transaction> {
        &self.transaction
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    /// The error recorded by the transaction, if any.
    pub fn error(&self) -> Option<TransactionError> {
        self.transaction.error()
    }

    /// Requests cooperative cancellation.
    ///
    /// Has no effect on transactions that ran inline without an operation.
    pub fn cancel(&self) {
        if let Completion::Operation(operation) = &self.completion {
            operation.cancel();
        }
    }

    /// Returns true once the transaction's operation has finished.
    pub fn is_finished(&self) -> bool {
        match &self.completion {
            Completion::Operation(operation) => operation.is_finished(),
            Completion::Inline(latch) => latch.is_released(),
        }
    }

    /// Blocks until the transaction is finished and returns its final state.
    pub fn wait(&self) -> TransactionState {
        match &self.completion {
            Completion::Operation(operation) => operation.core().wait_until_finished(),
            Completion::Inline(latch) => latch.wait(),
        }
        self.state()
    }

    /// Blocks until the transaction is finished or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> DispatchResult<TransactionState> {
        let finished = match &self.completion {
            Completion::Operation(operation) => {
                operation.core().wait_until_finished_timeout(timeout)
            }
            Completion::Inline(latch) => latch.wait_timeout(timeout),
        };
        if finished {
            Ok(self.state())
        } else {
            Err(DispatchError::Timeout {
                transaction_id: self.id().to_string(),
                timeout,
            })
        }
    }
}

impl fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Submits transactions according to their dispatch strategy.
pub struct Dispatcher {
    config: DispatcherConfig,
    concurrent: OperationQueue,
    serial: Mutex<HashMap<String, Arc<OperationQueue>>>,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher and its concurrent queue.
    pub fn new(config: DispatcherConfig) -> DispatchResult<Self> {
        let concurrent = OperationQueue::with_thread_prefix(
            CONCURRENT_QUEUE_NAME,
            config.concurrent_workers,
            config.thread_name_prefix,
        )?;
        Ok(Self {
            config,
            concurrent,
            serial: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Dispatches `transaction` according to its strategy.
    pub fn dispatch<T: Transaction>(&self, transaction: Arc<T>) -> DispatchResult<TransactionHandle> {
        self.dispatch_inner(transaction, None)
    }

    /// Dispatches `transaction` and runs `on_finish` once its state is final.
    pub fn dispatch_with<T, F>(
        &self,
        transaction: Arc<T>,
        on_finish: F,
    ) -> DispatchResult<TransactionHandle>
    where
        T: Transaction,
        F: FnOnce() + Send + 'static,
    {
        self.dispatch_inner(transaction, Some(Box::new(on_finish)))
    }

    fn dispatch_inner<T: Transaction>(
        &self,
        transaction: Arc<T>,
        on_finish: Option<Box<dyn FnOnce() + Send>>,
    ) -> DispatchResult<TransactionHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::queue_closed(DISPATCHER_NAME));
        }
        if !transaction.spawns_operation() {
            return Ok(Self::run_inline(transaction, on_finish));
        }
        let state = transaction.state();
        if state != TransactionState::Pending {
            return Err(DispatchError::AlreadyDispatched {
                transaction_id: transaction.id().to_string(),
                state: state.to_string(),
            });
        }

        let operation = TransactionOperation::new(Arc::clone(&transaction));
        if let Some(block) = on_finish {
            operation.on_finish(block);
        }
        let handle = TransactionHandle {
            transaction: transaction.clone(),
            completion: Completion::Operation(operation.clone()),
        };

        debug!(
            transaction = transaction.id(),
            strategy = %transaction.strategy(),
            "dispatching transaction"
        );
        match transaction.strategy() {
            DispatchStrategy::Sync => {
                let started = Instant::now();
                Arc::clone(&operation).start();
                self.wait_sync(&operation, started)?;
            }
            DispatchStrategy::Async(None) => self.concurrent.add_operation(operation)?,
            DispatchStrategy::Async(Some(name)) => {
                self.serial_queue(name)?.add_operation(operation)?;
            }
        }
        Ok(handle)
    }

    fn run_inline<T: Transaction>(
        transaction: Arc<T>,
        on_finish: Option<Box<dyn FnOnce() + Send>>,
    ) -> TransactionHandle {
        let latch = Arc::new(Latch::default());
        let release = Arc::clone(&latch);
        debug!(transaction = transaction.id(), "running transaction inline");
        transaction.run(Box::new(move |_| {
            if let Some(block) = on_finish {
                block();
            }
            release.release();
        }));
        TransactionHandle {
            transaction,
            completion: Completion::Inline(latch),
        }
    }

    fn wait_sync<T: Transaction>(
        &self,
        operation: &Arc<TransactionOperation<T>>,
        started: Instant,
    ) -> DispatchResult<()> {
        let Some(timeout) = self.config.sync_timeout else {
            operation.core().wait_until_finished();
            return Ok(());
        };
        let remaining = timeout.saturating_sub(started.elapsed());
        let finished = !remaining.is_zero()
            && operation.core().wait_until_finished_timeout(remaining);
        if finished {
            return Ok(());
        }
        let transaction_id = operation.transaction().id().to_string();
        warn!(
            transaction = %transaction_id,
            ?timeout,
            elapsed = ?started.elapsed(),
            "sync dispatch exceeded its bound, cancelling"
        );
        operation.cancel();
        Err(DispatchError::Timeout {
            transaction_id,
            timeout,
        })
    }

    fn serial_queue(&self, name: &str) -> DispatchResult<Arc<OperationQueue>> {
        let mut queues = self.serial.lock();
        if let Some(queue) = queues.get(name) {
            return Ok(Arc::clone(queue));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(DispatchError::queue_closed(name));
        }
        let queue = Arc::new(OperationQueue::with_thread_prefix(
            name,
            1,
            self.config.thread_name_prefix,
        )?);
        queues.insert(name.to_string(), Arc::clone(&queue));
        Ok(queue)
    }

    /// Returns the names of the serial queues created so far, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.serial.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of queued and executing operations across queues.
    pub fn operation_count(&self) -> usize {
        let serial: usize = self
            .serial_queues()
            .iter()
            .map(|queue| queue.operation_count())
            .sum();
        self.concurrent.operation_count() + serial
    }

    /// Blocks until every queue is idle.
    pub fn wait_all(&self) {
        self.concurrent.wait_until_all_operations_are_finished();
        for queue in self.serial_queues() {
            queue.wait_until_all_operations_are_finished();
        }
    }

    /// Cancels every queued and executing operation.
    pub fn cancel_all(&self) {
        self.concurrent.cancel_all_operations();
        for queue in self.serial_queues() {
            queue.cancel_all_operations();
        }
    }

    /// Closes every queue, draining queued work first.
    ///
    /// Every later dispatch fails with [`DispatchError::QueueClosed`].
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.concurrent.shutdown();
        for queue in self.serial_queues() {
            queue.shutdown();
        }
    }

    fn serial_queues(&self) -> Vec<Arc<OperationQueue>> {
        self.serial.lock().values().cloned().collect()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("serial_queues", &self.queue_names())
            .finish()
    }
}
