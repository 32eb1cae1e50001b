//! Dispatch integration helpers.
//!
//! [`DispatchHarness`] submits actions against a test store and records the
//! moment each one finishes, so tests can assert completion order.

use crate::fixtures::{test_store_with, TestAction, TestModel};
use crate::recorder::EventRecorder;
use std::sync::Arc;
use storeflow_core::{
    DispatchResult, DispatchStrategy, DispatcherConfig, Store, Transaction, TransactionHandle,
};

/// A store plus a recorder of finished transactions.
pub struct DispatchHarness {
    /// The store under test.
    pub store: Arc<Store<TestModel>>,
    /// Records `"done {label}"` when each submitted transaction finishes.
    pub recorder: EventRecorder,
    handles: Vec<(String, TransactionHandle)>,
}

impl DispatchHarness {
    /// Creates a harness with the default dispatcher configuration.
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default().thread_name_prefix("harness"))
    }

    /// Creates a harness with `config`.
    pub fn with_config(config: DispatcherConfig) -> Self {
        Self {
            store: test_store_with(config),
            recorder: EventRecorder::new(),
            handles: Vec::new(),
        }
    }

    /// Submits `action` under `strategy`, labelled `label`.
    pub fn submit(
        &mut self,
        label: &str,
        action: TestAction,
        strategy: DispatchStrategy,
    ) -> DispatchResult<TransactionHandle> {
        let transaction = Arc::new(self.store.transaction(action).on(strategy));
        let handle = self
            .store
            .dispatcher()
            .dispatch_with(transaction, self.recorder.marker(format!("done {label}")))?;
        self.handles.push((label.to_string(), handle.clone()));
        Ok(handle)
    }

    /// Waits for every submitted transaction.
    pub fn wait_all(&self) {
        for (_, handle) in &self.handles {
            handle.wait();
        }
    }

    /// Returns the handle submitted under `label`.
    pub fn handle(&self, label: &str) -> Option<&TransactionHandle> {
        self.handles
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, handle)| handle)
    }

    /// Asserts that `labels` finished in the given order.
    pub fn assert_finished_in_order(&self, labels: &[&str]) {
        for pair in labels.windows(2) {
            let first = format!("done {}", pair[0]);
            let second = format!("done {}", pair[1]);
            assert!(
                self.recorder.happened_before(&first, &second),
                "expected {} before {}; events: {:?}",
                pair[0],
                pair[1],
                self.recorder.events()
            );
        }
    }
}

impl Default for DispatchHarness {
    fn default() -> Self {
        Self::new()
    }
}
