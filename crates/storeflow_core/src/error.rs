//! Error types for StoreFlow core.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for dispatcher and queue operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors attached by value to a transaction when its underlying work fails.
///
/// These never cross the operation boundary as a panic or a returned `Err`;
/// they are stored in the transaction's error slot and read back by whoever
/// observes the transaction after it reaches a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The action's reducer rejected the mutation.
    #[error("action {action_id} failed: {message}")]
    Reducer {
        /// Identifier of the action that failed.
        action_id: String,
        /// Description of the failure.
        message: String,
    },

    /// The target store was dropped before the transaction ran.
    #[error("store released before transaction {transaction_id} could run")]
    StoreReleased {
        /// Identifier of the orphaned transaction.
        transaction_id: String,
    },

    /// The reducer dropped its context without fulfilling it.
    #[error("action {action_id} finished without calling fulfill")]
    Unfulfilled {
        /// Identifier of the action.
        action_id: String,
    },

    /// A state transition was attempted out of a terminal state or backwards.
    #[error("invalid transaction state transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl TransactionError {
    /// Creates a reducer error.
    pub fn reducer(action_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Reducer {
            action_id: action_id.into(),
            message: message.into(),
        }
    }

    /// Creates a store-released error.
    pub fn store_released(transaction_id: impl Into<String>) -> Self {
        Self::StoreReleased {
            transaction_id: transaction_id.into(),
        }
    }

    /// Creates an unfulfilled-context error.
    pub fn unfulfilled(action_id: impl Into<String>) -> Self {
        Self::Unfulfilled {
            action_id: action_id.into(),
        }
    }
}

/// Errors returned from the dispatcher and operation queues.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue no longer accepts operations.
    #[error("operation queue {queue} is closed")]
    QueueClosed {
        /// Name of the closed queue.
        queue: String,
    },

    /// Waiting for a transaction exceeded the configured bound.
    #[error("transaction {transaction_id} did not finish within {timeout:?}")]
    Timeout {
        /// Identifier of the transaction.
        transaction_id: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The transaction was already dispatched and has left `Pending`.
    #[error("transaction {transaction_id} was already dispatched (state {state})")]
    AlreadyDispatched {
        /// Identifier of the transaction.
        transaction_id: String,
        /// The state it was found in.
        state: String,
    },

    /// The transaction itself reported an error.
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A worker thread could not be spawned.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DispatchError {
    /// Creates a queue-closed error.
    pub fn queue_closed(queue: impl Into<String>) -> Self {
        Self::QueueClosed {
            queue: queue.into(),
        }
    }

    /// Returns true if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
