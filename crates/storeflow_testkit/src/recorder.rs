//! Ordered event recording across threads.

use parking_lot::Mutex;
use std::sync::Arc;
use storeflow_core::{AsyncOperation, OperationEvent, StateKey};

/// Collects labelled events in the order they happen, from any thread.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `event`.
    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Returns a closure that records `event` when called.
    pub fn marker(&self, event: impl Into<String>) -> impl FnOnce() + Send + 'static {
        let recorder = self.clone();
        let event = event.into();
        move || recorder.record(event)
    }

    /// Records every flag change of `operation` as `"{label} executing=.."`
    /// or `"{label} finished=.."`.
    pub fn watch(&self, label: impl Into<String>, operation: &dyn AsyncOperation) {
        let recorder = self.clone();
        let label = label.into();
        operation.core().observe(move |event: OperationEvent| {
            let key = match event.key {
                StateKey::IsExecuting => "executing",
                StateKey::IsFinished => "finished",
            };
            recorder.record(format!("{label} {key}={}", event.value));
        });
    }

    /// Returns a snapshot of the recorded events.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    /// Returns the index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        self.events.lock().iter().position(|e| e == event)
    }

    /// Returns true if `first` was recorded before `second`.
    pub fn happened_before(&self, first: &str, second: &str) -> bool {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        }
    }

    /// Clears the recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}
