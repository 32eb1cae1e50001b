//! Transactions and the operation that drives them.
//!
//! A [`Transaction`] is one state-changing request. It is executed by wrapping
//! it in a [`TransactionOperation`], which owns the lifecycle:
//!
//! ```text
//! Pending --start--> Started --finish--> Completed
//!    |                  \----finish (cancelled)--> Canceled
//!    \----execute (cancelled)----------------------> Canceled
//! ```
//!
//! The transaction's own logic never writes its state; it only signals
//! completion by calling `finish` on the operation it was handed.

use crate::error::TransactionError;
use crate::operation::{AsyncOperation, OperationCore};
use crate::store::AnyStore;
use crate::strategy::DispatchStrategy;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Handler invoked when a transaction run directly through
/// [`Transaction::run`] completes.
pub type CompletionHandler = Box<dyn FnOnce(Option<TransactionError>) + Send>;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionState {
    /// Created but not yet started.
    #[default]
    Pending,
    /// The transaction's work is in flight.
    Started,
    /// The work signalled completion.
    Completed,
    /// The operation was cancelled before or during the work.
    Canceled,
}

impl TransactionState {
    /// Returns true for `Completed` and `Canceled`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Canceled)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Started)
                | (Self::Pending, Self::Completed)
                | (Self::Pending, Self::Canceled)
                | (Self::Started, Self::Completed)
                | (Self::Started, Self::Canceled)
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Thread-safe holder of a transaction's state.
///
/// Transitions are monotonic: once terminal, the state never changes again.
#[derive(Debug, Default)]
pub struct StateCell {
    state: Mutex<TransactionState>,
}

impl StateCell {
    /// Creates a cell in the `Pending` state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn get(&self) -> TransactionState {
        *self.state.lock()
    }

    /// Moves to `next`, returning the previous state.
    ///
    /// Illegal transitions leave the state unchanged.
    pub fn transition(&self, next: TransactionState) -> Result<TransactionState, TransactionError> {
        let mut state = self.state.lock();
        let current = *state;
        if !current.can_transition_to(next) {
            return Err(TransactionError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        *state = next;
        trace!(from = %current, to = %next, "transaction state transition");
        Ok(current)
    }
}

/// One state-changing request.
///
/// Variants implement this trait: [`ActionTransaction`](crate::ActionTransaction)
/// mutates a store, [`SignpostTransaction`](crate::SignpostTransaction) carries
/// a marker through the pipeline without doing any work.
pub trait Transaction: Send + Sync + 'static {
    /// Unique identifier assigned at construction.
    fn id(&self) -> &str;

    /// Dispatch strategy chosen at construction or through [`on`](Self::on).
    fn strategy(&self) -> &DispatchStrategy;

    /// The state holder driven by the operation wrapper.
    fn state_cell(&self) -> &StateCell;

    /// Current lifecycle state.
    fn state(&self) -> TransactionState {
        self.state_cell().get()
    }

    /// The error recorded by the underlying work, if any.
    fn error(&self) -> Option<TransactionError>;

    /// Back-reference to the target store, if it is still alive.
    fn opaque_store_ref(&self) -> Option<Arc<dyn AnyStore>>;

    /// Runs the real work. Must eventually call `operation.finish()`.
    fn perform(&self, operation: Arc<dyn AsyncOperation>);

    /// Returns this transaction reconfigured with `strategy`.
    fn on(self, strategy: DispatchStrategy) -> Self
    where
        Self: Sized;

    /// Runs the work directly on the caller without an operation queue.
    fn run(&self, handler: CompletionHandler);

    /// Whether this transaction may be wrapped in a [`TransactionOperation`].
    fn spawns_operation(&self) -> bool {
        true
    }
}

type FinishBlock = Box<dyn FnOnce() + Send>;

/// Binds a transaction to an [`AsyncOperation`].
///
/// Finishing the operation sets the transaction's terminal state, runs every
/// registered finish block, and only then reports the operation finished to
/// the scheduler. Finish-block observers therefore always see the final
/// state before anything waiting on the operation is released.
pub struct TransactionOperation<T: Transaction> {
    core: OperationCore,
    transaction: Arc<T>,
    finish_blocks: Mutex<Option<Vec<FinishBlock>>>,
}

impl<T: Transaction> TransactionOperation<T> {
    /// Creates an operation for `transaction`.
    pub fn new(transaction: Arc<T>) -> Arc<Self> {
        Arc::new(Self {
            core: OperationCore::new(),
            transaction,
            finish_blocks: Mutex::new(Some(Vec::new())),
        })
    }

    /// The associated transaction.
    pub fn transaction(&self) -> &Arc<T> {
        &self.transaction
    }

    /// Finishes the operation without touching the transaction.
    ///
    /// Used when another operation owns the transaction; this wrapper's
    /// finish blocks are dropped unrun.
    fn release_slot(&self) {
        self.finish_blocks.lock().take();
        self.core.mark_finished();
    }

    /// Registers a block to run once the transaction state is final.
    ///
    /// Blocks registered after the operation finished run immediately on the
    /// calling thread.
    pub fn on_finish<F>(&self, block: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut blocks = self.finish_blocks.lock();
        match blocks.as_mut() {
            Some(pending) => pending.push(Box::new(block)),
            None => {
                drop(blocks);
                block();
            }
        }
    }
}

impl<T: Transaction> AsyncOperation for TransactionOperation<T> {
    fn core(&self) -> &OperationCore {
        &self.core
    }

    fn execute(self: Arc<Self>) {
        if self.is_cancelled() && self.transaction.state() == TransactionState::Pending {
            debug!(transaction = self.transaction.id(), "skipping cancelled transaction");
            self.finish();
            return;
        }
        if let Err(err) = self
            .transaction
            .state_cell()
            .transition(TransactionState::Started)
        {
            warn!(transaction = self.transaction.id(), %err, "cannot start transaction");
            self.release_slot();
            return;
        }
        debug!(
            transaction = self.transaction.id(),
            strategy = %self.transaction.strategy(),
            "transaction started"
        );
        let transaction = Arc::clone(&self.transaction);
        transaction.perform(self);
    }

    fn finish(&self) {
        if !self.core.begin_finish() {
            warn!(
                transaction = self.transaction.id(),
                "finish called more than once on a transaction operation"
            );
            return;
        }

        let terminal = if self.is_cancelled() {
            TransactionState::Canceled
        } else {
            TransactionState::Completed
        };
        if let Err(err) = self.transaction.state_cell().transition(terminal) {
            warn!(transaction = self.transaction.id(), %err, "unexpected terminal transition");
        }

        let blocks = self.finish_blocks.lock().take().unwrap_or_default();
        for block in blocks {
            block();
        }

        debug!(
            transaction = self.transaction.id(),
            state = %self.transaction.state(),
            "transaction finished"
        );
        self.core.complete_finish();
    }
}

impl<T: Transaction> fmt::Debug for TransactionOperation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionOperation")
            .field("transaction", &self.transaction.id())
            .field("state", &self.transaction.state())
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{OperationEvent, StateKey};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Records perform calls; finishes inline unless `hold` is set, in which
    /// case the operation is parked for the test to finish.
    #[derive(Default)]
    struct ProbeTransaction {
        id: String,
        strategy: DispatchStrategy,
        state: StateCell,
        performed: AtomicUsize,
        hold: bool,
        parked: Mutex<Option<Arc<dyn AsyncOperation>>>,
    }

    impl ProbeTransaction {
        fn immediate() -> Arc<Self> {
            Arc::new(Self {
                id: "probe".into(),
                ..Self::default()
            })
        }

        fn held() -> Arc<Self> {
            Arc::new(Self {
                id: "held".into(),
                hold: true,
                ..Self::default()
            })
        }

        fn release(&self) {
            let operation = self.parked.lock().take().expect("operation parked");
            operation.finish();
        }
    }

    impl Transaction for ProbeTransaction {
        fn id(&self) -> &str {
            &self.id
        }

        fn strategy(&self) -> &DispatchStrategy {
            &self.strategy
        }

        fn state_cell(&self) -> &StateCell {
            &self.state
        }

        fn error(&self) -> Option<TransactionError> {
            None
        }

        fn opaque_store_ref(&self) -> Option<Arc<dyn AnyStore>> {
            None
        }

        fn perform(&self, operation: Arc<dyn AsyncOperation>) {
            self.performed.fetch_add(1, Ordering::SeqCst);
            if self.hold {
                *self.parked.lock() = Some(operation);
            } else {
                operation.finish();
            }
        }

        fn on(mut self, strategy: DispatchStrategy) -> Self {
            self.strategy = strategy;
            self
        }

        fn run(&self, handler: CompletionHandler) {
            handler(None);
        }
    }

    #[test]
    fn new_state_cell_is_pending() {
        assert_eq!(StateCell::new().get(), TransactionState::Pending);
    }

    #[test]
    fn terminal_states_reject_transitions() {
        let cell = StateCell::new();
        cell.transition(TransactionState::Started).unwrap();
        cell.transition(TransactionState::Completed).unwrap();

        let err = cell.transition(TransactionState::Canceled).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidTransition { .. }));
        assert_eq!(cell.get(), TransactionState::Completed);
    }

    #[test]
    fn started_cannot_regress_to_pending() {
        let cell = StateCell::new();
        cell.transition(TransactionState::Started).unwrap();
        assert!(cell.transition(TransactionState::Pending).is_err());
        assert_eq!(cell.get(), TransactionState::Started);
    }

    #[test]
    fn on_replaces_strategy() {
        let probe = ProbeTransaction::default().on(DispatchStrategy::serial("q1"));
        assert_eq!(probe.strategy().queue_name(), Some("q1"));
    }

    #[test]
    fn execute_completes_transaction() {
        let txn = ProbeTransaction::immediate();
        let op = TransactionOperation::new(Arc::clone(&txn));

        Arc::clone(&op).start();

        assert_eq!(txn.state(), TransactionState::Completed);
        assert_eq!(txn.performed.load(Ordering::SeqCst), 1);
        assert!(op.is_finished());
    }

    #[test]
    fn cancel_before_execute_skips_perform() {
        let txn = ProbeTransaction::immediate();
        let op = TransactionOperation::new(Arc::clone(&txn));

        op.cancel();
        Arc::clone(&op).start();

        assert_eq!(txn.performed.load(Ordering::SeqCst), 0);
        assert_eq!(txn.state(), TransactionState::Canceled);
        assert!(op.is_finished());
    }

    #[test]
    fn cancel_during_perform_wins_over_completion() {
        let txn = ProbeTransaction::held();
        let op = TransactionOperation::new(Arc::clone(&txn));

        Arc::clone(&op).start();
        assert_eq!(txn.state(), TransactionState::Started);
        assert!(op.is_executing());

        op.cancel();
        txn.release();

        assert_eq!(txn.state(), TransactionState::Canceled);
        assert!(op.is_finished());
    }

    #[test]
    fn finish_block_sees_terminal_state_before_finished_flag() {
        let txn = ProbeTransaction::immediate();
        let op = TransactionOperation::new(Arc::clone(&txn));
        let log = Arc::new(Mutex::new(Vec::new()));

        let block_log = Arc::clone(&log);
        let block_txn = Arc::clone(&txn);
        let block_op = Arc::clone(&op);
        op.on_finish(move || {
            block_log.lock().push(format!(
                "block state={} finished={}",
                block_txn.state(),
                block_op.is_finished()
            ));
        });

        let observer_log = Arc::clone(&log);
        op.core().observe(move |event: OperationEvent| {
            if event.key == StateKey::IsFinished {
                observer_log.lock().push("finished".to_string());
            }
        });

        Arc::clone(&op).start();

        assert_eq!(
            *log.lock(),
            vec!["block state=completed finished=false".to_string(), "finished".to_string()]
        );
    }

    #[test]
    fn finish_blocks_run_exactly_once() {
        let txn = ProbeTransaction::held();
        let op = TransactionOperation::new(Arc::clone(&txn));
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let calls = Arc::clone(&calls);
            op.on_finish(move || {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        Arc::clone(&op).start();
        txn.release();
        op.finish();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(txn.state(), TransactionState::Completed);
    }

    #[test]
    fn late_finish_block_runs_immediately() {
        let txn = ProbeTransaction::immediate();
        let op = TransactionOperation::new(Arc::clone(&txn));
        Arc::clone(&op).start();

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        op.on_finish(move || flag.store(true, Ordering::SeqCst));

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn second_operation_leaves_running_transaction_alone() {
        let txn = ProbeTransaction::held();
        let first = TransactionOperation::new(Arc::clone(&txn));
        let second = TransactionOperation::new(Arc::clone(&txn));
        let second_block = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&second_block);
        second.on_finish(move || flag.store(true, Ordering::SeqCst));

        Arc::clone(&first).start();
        Arc::clone(&second).start();

        assert!(second.is_finished());
        assert!(!second_block.load(Ordering::SeqCst));
        assert_eq!(txn.state(), TransactionState::Started);
        assert_eq!(txn.performed.load(Ordering::SeqCst), 1);

        txn.release();
        assert_eq!(txn.state(), TransactionState::Completed);
        assert!(first.is_finished());
    }

    #[test]
    fn cancelled_second_operation_leaves_running_transaction_alone() {
        let txn = ProbeTransaction::held();
        let first = TransactionOperation::new(Arc::clone(&txn));
        let second = TransactionOperation::new(Arc::clone(&txn));

        Arc::clone(&first).start();
        second.cancel();
        Arc::clone(&second).start();

        assert!(second.is_finished());
        assert_eq!(txn.state(), TransactionState::Started);

        txn.release();
        assert_eq!(txn.state(), TransactionState::Completed);
    }

    #[test]
    fn cancel_from_finish_block_is_refused() {
        let txn = ProbeTransaction::immediate();
        let op = TransactionOperation::new(Arc::clone(&txn));
        let refused = Arc::new(AtomicBool::new(false));

        let block_op = Arc::clone(&op);
        let flag = Arc::clone(&refused);
        op.on_finish(move || flag.store(!block_op.core().cancel(), Ordering::SeqCst));

        Arc::clone(&op).start();

        assert!(refused.load(Ordering::SeqCst));
        assert!(!op.is_cancelled());
        assert_eq!(txn.state(), TransactionState::Completed);
    }

    fn any_state() -> impl Strategy<Value = TransactionState> {
        prop_oneof![
            Just(TransactionState::Pending),
            Just(TransactionState::Started),
            Just(TransactionState::Completed),
            Just(TransactionState::Canceled),
        ]
    }

    proptest! {
        #[test]
        fn state_never_leaves_terminal(steps in proptest::collection::vec(any_state(), 0..32)) {
            let cell = StateCell::new();
            let mut terminal: Option<TransactionState> = None;
            for step in steps {
                let before = cell.get();
                let result = cell.transition(step);
                prop_assert_eq!(result.is_ok(), before.can_transition_to(step));
                if let Some(reached) = terminal {
                    prop_assert_eq!(cell.get(), reached);
                } else if cell.get().is_terminal() {
                    terminal = Some(cell.get());
                }
            }
        }
    }
}
