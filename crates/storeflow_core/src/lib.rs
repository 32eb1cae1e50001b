//! # StoreFlow Core
//!
//! Transactional, queue-scheduled state mutation.
//!
//! This crate provides:
//! - Cancellable asynchronous operations with observable executing/finished flags
//! - Transactions with a monotonic pending → started → completed/canceled lifecycle
//! - Dispatch strategies: synchronous, concurrent, or serialized per queue name
//! - Operation queues that run operations on worker threads
//! - A minimal in-memory store and the action transaction that mutates it
//! - Signpost transactions that carry markers through the same pipeline
//!
//! ## Ordering
//!
//! Transactions dispatched with the same serial queue name run one at a time
//! in submission order. Anything else may interleave.
//!
//! ```rust,ignore
//! use storeflow_core::{Dispatcher, DispatcherConfig, DispatchStrategy, Store};
//! use std::sync::Arc;
//!
//! let dispatcher = Arc::new(Dispatcher::new(DispatcherConfig::default())?);
//! let store = Store::new(Model::default(), dispatcher);
//!
//! let a = store.run(Action::Increase(1), DispatchStrategy::serial("q1"))?;
//! let b = store.run(Action::Increase(2), DispatchStrategy::serial("q1"))?;
//! b.wait(); // a has already completed
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod dispatcher;
mod error;
mod operation;
mod push_id;
mod queue;
mod signpost;
mod store;
mod strategy;
mod transaction;

pub use config::DispatcherConfig;
pub use dispatcher::{Dispatcher, TransactionHandle};
pub use error::{DispatchError, DispatchResult, TransactionError};
pub use operation::{AsyncOperation, BlockOperation, OperationCore, OperationEvent, StateKey};
pub use push_id::{PushId, PUSH_ID_LEN};
pub use queue::OperationQueue;
pub use signpost::{Signpost, SignpostTransaction};
pub use store::{ActionTransaction, ActionType, AnyStore, Store, TransactionContext};
pub use strategy::DispatchStrategy;
pub use transaction::{
    CompletionHandler, StateCell, Transaction, TransactionOperation, TransactionState,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
