//! Stores, actions and the mutating transaction.
//!
//! A [`Store`] owns a model behind a lock and a [`Dispatcher`]. Mutations are
//! described by actions ([`ActionType`]); running an action creates an
//! [`ActionTransaction`] whose `perform` hands the action a
//! [`TransactionContext`]. The reducer mutates the model through the context
//! and then calls [`TransactionContext::fulfill`] exactly once, possibly from
//! another thread.

use crate::dispatcher::{Dispatcher, TransactionHandle};
use crate::error::{DispatchResult, TransactionError};
use crate::operation::AsyncOperation;
use crate::push_id::PushId;
use crate::signpost::SignpostTransaction;
use crate::strategy::DispatchStrategy;
use crate::transaction::{CompletionHandler, StateCell, Transaction, TransactionState};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// A description of one mutation plus the reducer that applies it.
pub trait ActionType<M>: Send + Sync + 'static {
    /// Identifier of the action kind, e.g. `"INCREASE"`.
    fn id(&self) -> &str;

    /// Applies the action through `context` and fulfills it.
    fn reduce(&self, context: TransactionContext<M>);
}

/// Type-erased view of a store, used for back-references from transactions.
pub trait AnyStore: Send + Sync {
    /// Unique identifier of the store.
    fn store_id(&self) -> &str;

    /// Returns `self` as `Any` for downcasting to the concrete store.
    fn as_any(&self) -> &dyn Any;
}

/// An in-memory model container.
pub struct Store<M> {
    id: String,
    model: RwLock<M>,
    dispatcher: Arc<Dispatcher>,
}

impl<M: Send + Sync + 'static> Store<M> {
    /// Creates a store for `model` that dispatches through `dispatcher`.
    pub fn new(model: M, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        Arc::new(Self {
            id: PushId::global().make(),
            model: RwLock::new(model),
            dispatcher,
        })
    }

    /// Returns the store id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns a copy of the current model.
    pub fn model(&self) -> M
    where
        M: Clone,
    {
        self.model.read().clone()
    }

    /// Reads the model without copying it.
    pub fn with_model<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.model.read())
    }

    /// Mutates the model.
    pub fn reduce_model(&self, f: impl FnOnce(&mut M)) {
        f(&mut self.model.write());
    }

    /// Creates a transaction for `action` targeting this store.
    ///
    /// The transaction uses the default strategy; change it with
    /// [`Transaction::on`].
    pub fn transaction<A: ActionType<M>>(self: &Arc<Self>, action: A) -> ActionTransaction<M, A> {
        ActionTransaction::new(action, Arc::downgrade(self))
    }

    /// Dispatches `action` with `strategy`.
    pub fn run<A: ActionType<M>>(
        self: &Arc<Self>,
        action: A,
        strategy: DispatchStrategy,
    ) -> DispatchResult<TransactionHandle> {
        let transaction = self.transaction(action).on(strategy);
        self.dispatcher.dispatch(Arc::new(transaction))
    }

    /// Dispatches a signpost marker through this store's dispatcher.
    pub fn signpost(&self, name: &str) -> DispatchResult<TransactionHandle> {
        self.dispatcher
            .dispatch(Arc::new(SignpostTransaction::new(name)))
    }
}

impl<M: Send + Sync + 'static> AnyStore for Store<M> {
    fn store_id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<M> fmt::Debug for Store<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("id", &self.id).finish_non_exhaustive()
    }
}

/// The reducer's view of a running transaction.
///
/// Dropping a context without calling [`fulfill`](Self::fulfill) or
/// [`reject`](Self::reject) completes the transaction with
/// [`TransactionError::Unfulfilled`].
pub struct TransactionContext<M> {
    store: Arc<Store<M>>,
    transaction_id: String,
    action_id: String,
    operation: Option<Arc<dyn AsyncOperation>>,
    completion: Option<CompletionHandler>,
}

impl<M: Send + Sync + 'static> TransactionContext<M> {
    /// Mutates the target model.
    pub fn reduce_model(&self, f: impl FnOnce(&mut M)) {
        self.store.reduce_model(f);
    }

    /// Returns a copy of the target model.
    pub fn model(&self) -> M
    where
        M: Clone,
    {
        self.store.model()
    }

    /// The target store.
    pub fn store(&self) -> &Arc<Store<M>> {
        &self.store
    }

    /// Returns true if the operation running this transaction was cancelled.
    ///
    /// Long-running reducers poll this and fulfill early.
    pub fn is_cancelled(&self) -> bool {
        self.operation
            .as_ref()
            .is_some_and(|operation| operation.is_cancelled())
    }

    /// Id of the running transaction.
    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    /// Id of the action being reduced.
    pub fn action_id(&self) -> &str {
        &self.action_id
    }

    /// Marks the action handled.
    pub fn fulfill(mut self) {
        self.complete(None);
    }

    /// Marks the action failed with `message`.
    pub fn reject(mut self, message: impl Into<String>) {
        let error = TransactionError::reducer(self.action_id.clone(), message);
        self.complete(Some(error));
    }
}

impl<M> TransactionContext<M> {
    fn complete(&mut self, error: Option<TransactionError>) {
        if let Some(completion) = self.completion.take() {
            completion(error);
        }
    }
}

impl<M> Drop for TransactionContext<M> {
    fn drop(&mut self) {
        if self.completion.is_some() {
            warn!(
                transaction = %self.transaction_id,
                action = %self.action_id,
                "context dropped without fulfill"
            );
            let error = TransactionError::unfulfilled(self.action_id.clone());
            self.complete(Some(error));
        }
    }
}

impl<M> fmt::Debug for TransactionContext<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("transaction_id", &self.transaction_id)
            .field("action_id", &self.action_id)
            .field("fulfilled", &self.completion.is_none())
            .finish()
    }
}

/// A transaction that applies an action to a store.
pub struct ActionTransaction<M, A> {
    id: String,
    strategy: DispatchStrategy,
    state: Arc<StateCell>,
    error: Arc<Mutex<Option<TransactionError>>>,
    store: Weak<Store<M>>,
    action: A,
}

impl<M, A> ActionTransaction<M, A>
where
    M: Send + Sync + 'static,
    A: ActionType<M>,
{
    /// Creates a transaction for `action` against `store`.
    pub fn new(action: A, store: Weak<Store<M>>) -> Self {
        Self {
            id: PushId::global().make(),
            strategy: DispatchStrategy::default(),
            state: Arc::new(StateCell::new()),
            error: Arc::new(Mutex::new(None)),
            store,
            action,
        }
    }

    /// The action this transaction applies.
    pub fn action(&self) -> &A {
        &self.action
    }

    fn context(
        &self,
        store: Arc<Store<M>>,
        operation: Option<Arc<dyn AsyncOperation>>,
        completion: CompletionHandler,
    ) -> TransactionContext<M> {
        TransactionContext {
            store,
            transaction_id: self.id.clone(),
            action_id: self.action.id().to_string(),
            operation,
            completion: Some(completion),
        }
    }
}

impl<M, A> Transaction for ActionTransaction<M, A>
where
    M: Send + Sync + 'static,
    A: ActionType<M>,
{
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
        self.error.lock().clone()
    }

    fn opaque_store_ref(&self) -> Option<Arc<dyn AnyStore>> {
        self.store
            .upgrade()
            .map(|store| store as Arc<dyn AnyStore>)
    }

    fn perform(&self, operation: Arc<dyn AsyncOperation>) {
        let Some(store) = self.store.upgrade() else {
            debug!(transaction = %self.id, "store released, skipping action");
            *self.error.lock() = Some(TransactionError::store_released(self.id.clone()));
            operation.finish();
            return;
        };

        let error_slot = Arc::clone(&self.error);
        let finisher = Arc::clone(&operation);
        let completion: CompletionHandler = Box::new(move |error| {
            if let Some(error) = error {
                *error_slot.lock() = Some(error);
            }
            finisher.finish();
        });

        let context = self.context(store, Some(operation), completion);
        self.action.reduce(context);
    }

    fn on(mut self, strategy: DispatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    fn run(&self, handler: CompletionHandler) {
        if let Err(error) = self.state.transition(TransactionState::Started) {
            handler(Some(error));
            return;
        }

        let Some(store) = self.store.upgrade() else {
            let error = TransactionError::store_released(self.id.clone());
            *self.error.lock() = Some(error.clone());
            let _ = self.state.transition(TransactionState::Completed);
            handler(Some(error));
            return;
        };

        let error_slot = Arc::clone(&self.error);
        let state = Arc::clone(&self.state);
        let completion: CompletionHandler = Box::new(move |error| {
            if let Some(error) = &error {
                *error_slot.lock() = Some(error.clone());
            }
            let _ = state.transition(TransactionState::Completed);
            handler(error);
        });

        let context = self.context(store, None, completion);
        self.action.reduce(context);
    }
}

impl<M, A> fmt::Debug for ActionTransaction<M, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTransaction")
            .field("id", &self.id)
            .field("strategy", &self.strategy)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
