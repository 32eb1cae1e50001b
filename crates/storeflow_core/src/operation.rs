//! Cancellable asynchronous operations.
//!
//! An [`AsyncOperation`] is a unit of work whose completion is decoupled from
//! the return of [`AsyncOperation::execute`]. The operation stays executing
//! until [`AsyncOperation::finish`] is called, possibly from another thread
//! much later. Schedulers observe the executing/finished flags through
//! [`OperationCore`] to know when a slot frees up.
//!
//! Cancellation is cooperative: [`AsyncOperation::cancel`] only sets a flag.
//! Implementations of `execute` check it early, skip their work, and still
//! call `finish`.

use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// The observable scheduling flags of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKey {
    /// The `is_executing` flag.
    IsExecuting,
    /// The `is_finished` flag.
    IsFinished,
}

/// A change to one of the scheduling flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationEvent {
    /// Which flag changed.
    pub key: StateKey,
    /// The new value of the flag.
    pub value: bool,
}

type Observer = Arc<dyn Fn(OperationEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct Flags {
    started: bool,
    executing: bool,
    finishing: bool,
    finished: bool,
}

/// Shared scheduling state embedded in every operation.
pub struct OperationCore {
    flags: Mutex<Flags>,
    finished_cv: Condvar,
    cancelled: AtomicBool,
    observers: RwLock<Vec<Observer>>,
}

impl OperationCore {
    /// Creates a core in the not-yet-started state.
    pub fn new() -> Self {
        Self {
            flags: Mutex::new(Flags::default()),
            finished_cv: Condvar::new(),
            cancelled: AtomicBool::new(false),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Returns true while the operation is executing.
    pub fn is_executing(&self) -> bool {
        self.flags.lock().executing
    }

    /// Returns true once the operation has finished.
    pub fn is_finished(&self) -> bool {
        self.flags.lock().finished
    }

    /// Returns true if the operation has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sets the cancellation flag.
    ///
    /// Returns false if the flag was already set or the operation has
    /// already finished, in which case nothing changes.
    pub fn cancel(&self) -> bool {
        let flags = self.flags.lock();
        if flags.finishing || flags.finished {
            return false;
        }
        !self.cancelled.swap(true, Ordering::SeqCst)
    }

    /// Registers an observer for flag changes.
    ///
    /// Observers run after the flag is updated, outside internal locks, on
    /// the thread that changed the flag.
    pub fn observe<F>(&self, observer: F)
    where
        F: Fn(OperationEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Moves the operation into the executing state.
    ///
    /// Returns false if it was already started or finished.
    pub fn mark_started(&self) -> bool {
        {
            let mut flags = self.flags.lock();
            if flags.started || flags.finishing || flags.finished {
                return false;
            }
            flags.started = true;
            flags.executing = true;
        }
        self.notify(StateKey::IsExecuting, true);
        true
    }

    /// Flips `executing` off and then `finished` on, notifying observers of
    /// each change in that order.
    ///
    /// Returns false if the operation was already finishing or finished.
    pub fn mark_finished(&self) -> bool {
        if !self.begin_finish() {
            return false;
        }
        self.complete_finish();
        true
    }

    /// Enters the finishing phase.
    ///
    /// From here on [`cancel`](Self::cancel) is refused, so the cancelled
    /// flag read while finishing is final. Returns false if the operation was
    /// already finishing or finished.
    pub fn begin_finish(&self) -> bool {
        let mut flags = self.flags.lock();
        if flags.finishing || flags.finished {
            return false;
        }
        flags.finishing = true;
        true
    }

    /// Completes a finish started with [`begin_finish`](Self::begin_finish).
    pub fn complete_finish(&self) {
        let was_executing = {
            let mut flags = self.flags.lock();
            if flags.finished {
                return;
            }
            flags.finishing = true;
            std::mem::replace(&mut flags.executing, false)
        };
        if was_executing {
            self.notify(StateKey::IsExecuting, false);
        }

        {
            let mut flags = self.flags.lock();
            flags.finished = true;
            self.finished_cv.notify_all();
        }
        self.notify(StateKey::IsFinished, true);
    }

    /// Blocks until the operation has finished.
    pub fn wait_until_finished(&self) {
        let mut flags = self.flags.lock();
        while !flags.finished {
            self.finished_cv.wait(&mut flags);
        }
    }

    /// Blocks until the operation has finished or `timeout` elapses.
    ///
    /// Returns true if the operation finished.
    pub fn wait_until_finished_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        while !flags.finished {
            if self
                .finished_cv
                .wait_until(&mut flags, deadline)
                .timed_out()
            {
                return flags.finished;
            }
        }
        true
    }

    fn notify(&self, key: StateKey, value: bool) {
        trace!(?key, value, "operation flag changed");
        let observers: Vec<Observer> = self.observers.read().clone();
        let event = OperationEvent { key, value };
        for observer in observers {
            observer(event);
        }
    }
}

impl Default for OperationCore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OperationCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags.lock();
        f.debug_struct("OperationCore")
            .field("executing", &flags.executing)
            .field("finished", &flags.finished)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// A cancellable, asynchronously-completing unit of work.
///
/// Implementors provide [`execute`](Self::execute) and must make sure
/// [`finish`](Self::finish) is called exactly once on every path, including
/// when the operation was cancelled before it got to run.
pub trait AsyncOperation: Send + Sync {
    /// Returns the scheduling state of this operation.
    fn core(&self) -> &OperationCore;

    /// Performs the operation's work.
    fn execute(self: Arc<Self>);

    /// Begins execution: marks the operation executing and calls `execute`.
    fn start(self: Arc<Self>) {
        if self.core().mark_started() {
            self.execute();
        } else {
            warn!("start called on an operation that already started");
        }
    }

    /// Marks the operation finished.
    fn finish(&self) {
        if !self.core().mark_finished() {
            warn!("finish called more than once on the same operation");
        }
    }

    /// Requests cooperative cancellation.
    fn cancel(&self) {
        self.core().cancel();
    }

    /// Returns true if cancellation was requested.
    fn is_cancelled(&self) -> bool {
        self.core().is_cancelled()
    }

    /// Returns true while executing.
    fn is_executing(&self) -> bool {
        self.core().is_executing()
    }

    /// Returns true once finished.
    fn is_finished(&self) -> bool {
        self.core().is_finished()
    }
}

/// An operation that runs a closure and finishes when it returns.
///
/// A cancelled block operation finishes without running its closure.
pub struct BlockOperation {
    core: OperationCore,
    block: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl BlockOperation {
    /// Wraps `block` in an operation.
    pub fn new<F>(block: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Arc::new(Self {
            core: OperationCore::new(),
            block: Mutex::new(Some(Box::new(block))),
        })
    }
}

impl AsyncOperation for BlockOperation {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn execute(self: Arc<Self>) {
        let block = self.block.lock().take();
        if !self.is_cancelled() {
            if let Some(block) = block {
                block();
            }
        }
        self.finish();
    }
}

impl fmt::Debug for BlockOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockOperation")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}
