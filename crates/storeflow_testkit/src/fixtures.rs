//! Test fixtures and store helpers.
//!
//! Provides a small serializable model, the actions that mutate it, and
//! convenience constructors for stores and dispatchers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use storeflow_core::{ActionType, Dispatcher, DispatcherConfig, Store, TransactionContext};

/// A nested value inside [`TestModel`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nested {
    /// Label of the nested value.
    pub label: String,
}

impl Default for Nested {
    fn default() -> Self {
        Self {
            label: "Nested struct".to_string(),
        }
    }
}

/// The model used across tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestModel {
    /// A counter.
    pub count: i64,
    /// A label.
    pub label: String,
    /// A label that can be cleared.
    pub nullable_label: Option<String>,
    /// A nested value.
    pub nested: Nested,
    /// A list of nested values.
    pub array: Vec<Nested>,
}

impl Default for TestModel {
    fn default() -> Self {
        Self {
            count: 0,
            label: "Foo".to_string(),
            nullable_label: Some("Something".to_string()),
            nested: Nested::default(),
            array: vec![Nested::default(), Nested::default()],
        }
    }
}

impl TestModel {
    /// Serializes the model to JSON.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("TestModel is always serializable")
    }
}

/// Actions that mutate [`TestModel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestAction {
    /// Adds `amount` to the counter.
    Increase {
        /// Amount to add.
        amount: i64,
    },
    /// Subtracts `amount` from the counter.
    Decrease {
        /// Amount to subtract.
        amount: i64,
    },
    /// Replaces the labels and clears the nullable one.
    UpdateLabel {
        /// The new label.
        new_label: String,
    },
    /// Sets the label of one array element.
    SetArray {
        /// Index into the array.
        index: usize,
        /// The new label.
        value: String,
    },
    /// Adds `amount` from a background thread after `delay`.
    Delayed {
        /// Amount to add.
        amount: i64,
        /// How long the background thread sleeps first.
        delay: Duration,
    },
    /// Rejects without touching the model.
    Fail {
        /// Rejection message.
        message: String,
    },
}

impl ActionType<TestModel> for TestAction {
    fn id(&self) -> &str {
        match self {
            Self::Increase { .. } => "INCREASE",
            Self::Decrease { .. } => "DECREASE",
            Self::UpdateLabel { .. } => "UPDATE_LABEL",
            Self::SetArray { .. } => "SET_ARRAY",
            Self::Delayed { .. } => "DELAYED",
            Self::Fail { .. } => "FAIL",
        }
    }

    fn reduce(&self, context: TransactionContext<TestModel>) {
        match self {
            Self::Increase { amount } => {
                context.reduce_model(|m| m.count += amount);
                context.fulfill();
            }
            Self::Decrease { amount } => {
                context.reduce_model(|m| m.count -= amount);
                context.fulfill();
            }
            Self::UpdateLabel { new_label } => {
                context.reduce_model(|m| {
                    m.label = new_label.clone();
                    m.nested.label = new_label.clone();
                    m.nullable_label = None;
                });
                context.fulfill();
            }
            Self::SetArray { index, value } => {
                let in_bounds = context.store().with_model(|m| *index < m.array.len());
                if !in_bounds {
                    context.reject(format!("index {index} out of bounds"));
                    return;
                }
                context.reduce_model(|m| m.array[*index].label = value.clone());
                context.fulfill();
            }
            Self::Delayed { amount, delay } => {
                let (amount, delay) = (*amount, *delay);
                thread::spawn(move || {
                    thread::sleep(delay);
                    if !context.is_cancelled() {
                        context.reduce_model(|m| m.count += amount);
                    }
                    context.fulfill();
                });
            }
            Self::Fail { message } => context.reject(message.clone()),
        }
    }
}

/// Creates a dispatcher with the default configuration.
pub fn test_dispatcher() -> Arc<Dispatcher> {
    test_dispatcher_with(DispatcherConfig::default().thread_name_prefix("testkit"))
}

/// Creates a dispatcher with `config`.
pub fn test_dispatcher_with(config: DispatcherConfig) -> Arc<Dispatcher> {
    Arc::new(Dispatcher::new(config).expect("Failed to create dispatcher"))
}

/// Creates a store holding the default [`TestModel`].
pub fn test_store() -> Arc<Store<TestModel>> {
    Store::new(TestModel::default(), test_dispatcher())
}

/// Creates a store holding the default [`TestModel`] with a custom dispatcher
/// configuration.
pub fn test_store_with(config: DispatcherConfig) -> Arc<Store<TestModel>> {
    Store::new(TestModel::default(), test_dispatcher_with(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use storeflow_core::{DispatchStrategy, TransactionError, TransactionState};

    #[test]
    fn default_model_matches_fixture() {
        let model = TestModel::default();
        assert_eq!(model.count, 0);
        assert_eq!(model.label, "Foo");
        assert_eq!(model.nullable_label.as_deref(), Some("Something"));
        assert_eq!(model.array.len(), 2);
    }

    #[test]
    fn update_label_clears_nullable() {
        let store = test_store();
        store
            .run(
                TestAction::UpdateLabel { new_label: "Bar".into() },
                DispatchStrategy::Sync,
            )
            .unwrap();

        let model = store.model();
        assert_eq!(model.label, "Bar");
        assert_eq!(model.nested.label, "Bar");
        assert!(model.nullable_label.is_none());
    }

    #[test]
    fn set_array_out_of_bounds_rejects() {
        let store = test_store();
        let handle = store
            .run(
                TestAction::SetArray { index: 9, value: "x".into() },
                DispatchStrategy::Sync,
            )
            .unwrap();

        assert_eq!(handle.state(), TransactionState::Completed);
        assert!(matches!(handle.error(), Some(TransactionError::Reducer { .. })));
        assert_eq!(store.model(), TestModel::default());
    }

    #[test]
    fn to_json_uses_field_names() {
        let json = TestModel::default().to_json();
        assert_eq!(json["label"], "Foo");
        assert_eq!(json["array"][0]["label"], "Nested struct");
    }
}
