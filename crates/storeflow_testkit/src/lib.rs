//! # StoreFlow Testkit
//!
//! Test utilities for StoreFlow.
//!
//! This crate provides:
//! - A serializable test model and the actions that mutate it
//! - Store and dispatcher helpers
//! - An event recorder for asserting cross-thread ordering
//! - Property-based generators for action sequences
//!
//! ## Usage
//!
//! ```rust,ignore
//! use storeflow_testkit::prelude::*;
//!
//! #[test]
//! fn increments() {
//!     let store = test_store();
//!     store.run(TestAction::Increase { amount: 1 }, DispatchStrategy::Sync).unwrap();
//!     assert_eq!(store.model().count, 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod recorder;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::recorder::*;
    pub use storeflow_core::{DispatchStrategy, Transaction, TransactionState};
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use recorder::*;
