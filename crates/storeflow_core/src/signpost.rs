//! Marker transactions.
//!
//! A [`SignpostTransaction`] travels through the same dispatch pipeline as a
//! mutating transaction but has no store, no operation and no work. It is
//! used to thread marker events (a model update boundary, an undo/redo step)
//! through the dispatcher.

use crate::error::TransactionError;
use crate::operation::AsyncOperation;
use crate::push_id::PushId;
use crate::store::AnyStore;
use crate::strategy::DispatchStrategy;
use crate::transaction::{CompletionHandler, StateCell, Transaction, TransactionState};
use std::sync::Arc;
use tracing::trace;

/// Well-known signpost names.
#[derive(Debug, Clone, Copy)]
pub struct Signpost;

impl Signpost {
    /// Marks the point before a batch of changes.
    pub const PRIOR: &'static str = "signpost_prior";
    /// Marks a model update.
    pub const MODEL_UPDATE: &'static str = "signpost_model_update";
    /// Marks an undo or redo step.
    pub const UNDO_REDO: &'static str = "signpost_undo_redo";
}

/// A transaction that performs no operation.
#[derive(Debug)]
pub struct SignpostTransaction {
    action_id: String,
    id: String,
    strategy: DispatchStrategy,
    state: StateCell,
}

impl SignpostTransaction {
    /// Creates a signpost carrying the marker `signpost`.
    pub fn new(signpost: impl Into<String>) -> Self {
        Self {
            action_id: signpost.into(),
            id: PushId::global().make(),
            strategy: DispatchStrategy::Async(None),
            state: StateCell::new(),
        }
    }

    /// The marker carried by this signpost.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Signposts never spawn an operation.
    ///
    /// # Panics
    ///
    /// Always. Asking a signpost for its operation is a programming error.
    pub fn operation(&self) -> Arc<dyn AsyncOperation> {
        panic!("signpost transaction {} does not spawn any operation", self.id)
    }
}

impl Transaction for SignpostTransaction {
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

    fn perform(&self, _operation: Arc<dyn AsyncOperation>) {}

    fn on(self, _strategy: DispatchStrategy) -> Self {
        self
    }

    fn run(&self, handler: CompletionHandler) {
        if self.state.get() == TransactionState::Pending {
            let _ = self.state.transition(TransactionState::Completed);
        }
        trace!(signpost = %self.action_id, id = %self.id, "signpost passed");
        handler(None);
    }

    fn spawns_operation(&self) -> bool {
        false
    }
}
