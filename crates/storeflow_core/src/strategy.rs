//! Dispatch strategies.

use std::fmt;

/// Selects how a transaction is executed once submitted.
///
/// Transactions sharing a queue name run one at a time in submission order.
/// Transactions with different names, or no name, have no ordering guarantee
/// relative to each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DispatchStrategy {
    /// Run inline on the caller, blocking until the transaction is terminal.
    Sync,
    /// Run off the caller. `Some(name)` serializes through the named queue;
    /// `None` uses the shared concurrent queue.
    Async(Option<String>),
}

impl DispatchStrategy {
    /// Creates a strategy bound to the serial queue `name`.
    pub fn serial(name: impl Into<String>) -> Self {
        Self::Async(Some(name.into()))
    }

    /// Returns the serial queue name, if any.
    #[must_use]
    pub fn queue_name(&self) -> Option<&str> {
        match self {
            Self::Async(Some(name)) => Some(name),
            _ => None,
        }
    }

    /// Returns true if the strategy serializes through a named queue.
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        self.queue_name().is_some()
    }

    /// Returns true if the strategy blocks the caller.
    #[must_use]
    pub fn is_sync(&self) -> bool {
        matches!(self, Self::Sync)
    }
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        Self::Async(None)
    }
}

impl fmt::Display for DispatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "sync"),
            Self::Async(None) => write!(f, "async"),
            Self::Async(Some(name)) => write!(f, "async({name})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_unnamed_async() {
        let strategy = DispatchStrategy::default();
        assert_eq!(strategy, DispatchStrategy::Async(None));
        assert!(!strategy.is_serialized());
        assert!(!strategy.is_sync());
    }

    #[test]
    fn serial_has_queue_name() {
        let strategy = DispatchStrategy::serial("q1");
        assert_eq!(strategy.queue_name(), Some("q1"));
        assert!(strategy.is_serialized());
    }

    #[test]
    fn display() {
        assert_eq!(DispatchStrategy::Sync.to_string(), "sync");
        assert_eq!(DispatchStrategy::default().to_string(), "async");
        assert_eq!(DispatchStrategy::serial("main").to_string(), "async(main)");
    }
}
