//! Property-based test generators using proptest.
//!
//! Provides strategies for generating actions and dispatch strategies, plus
//! a reference reducer to compare dispatched results against.

use crate::fixtures::{TestAction, TestModel};
use proptest::prelude::*;
use storeflow_core::DispatchStrategy;

/// Strategy for generating synchronous, model-mutating actions.
///
/// Delayed and failing actions are left out so the generated batches can be
/// checked against [`apply_reference`].
pub fn test_action_strategy() -> impl Strategy<Value = TestAction> {
    prop_oneof![
        (-100i64..100).prop_map(|amount| TestAction::Increase { amount }),
        (-100i64..100).prop_map(|amount| TestAction::Decrease { amount }),
        "[a-zA-Z]{1,12}".prop_map(|new_label| TestAction::UpdateLabel { new_label }),
        (0usize..2, "[a-z]{1,8}").prop_map(|(index, value)| TestAction::SetArray { index, value }),
    ]
}

/// Strategy for generating batches of actions.
pub fn action_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<TestAction>> {
    prop::collection::vec(test_action_strategy(), 1..=max_len.max(1))
}

/// Strategy for generating dispatch strategies over a small set of queue
/// names.
pub fn dispatch_strategy_strategy() -> impl Strategy<Value = DispatchStrategy> {
    prop_oneof![
        Just(DispatchStrategy::Sync),
        Just(DispatchStrategy::Async(None)),
        (0u8..3).prop_map(|n| DispatchStrategy::serial(format!("q{n}"))),
    ]
}

/// Applies `action` to `model` directly, without a store.
pub fn apply_reference(model: &mut TestModel, action: &TestAction) {
    match action {
        TestAction::Increase { amount } => model.count += amount,
        TestAction::Decrease { amount } => model.count -= amount,
        TestAction::UpdateLabel { new_label } => {
            model.label = new_label.clone();
            model.nested.label = new_label.clone();
            model.nullable_label = None;
        }
        TestAction::SetArray { index, value } => {
            if let Some(item) = model.array.get_mut(*index) {
                item.label = value.clone();
            }
        }
        TestAction::Delayed { amount, .. } => model.count += amount,
        TestAction::Fail { .. } => {}
    }
}

/// Applies a batch of actions to the default model.
pub fn reference_model(actions: &[TestAction]) -> TestModel {
    let mut model = TestModel::default();
    for action in actions {
        apply_reference(&mut model, action);
    }
    model
}
