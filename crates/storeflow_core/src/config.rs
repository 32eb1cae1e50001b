//! Dispatcher configuration.

use std::time::Duration;

/// Configuration for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of worker threads serving the shared concurrent queue.
    pub concurrent_workers: usize,

    /// Upper bound on how long a `Sync` dispatch may take.
    ///
    /// `None` waits for as long as the transaction takes. The clock starts
    /// before the transaction starts, so work done inline by the reducer
    /// counts against it. Inline work cannot be interrupted: if it overruns,
    /// the dispatch still returns a timeout error once control comes back,
    /// even though the transaction may already be terminal. Deferred work
    /// still pending at the deadline is cancelled cooperatively.
    pub sync_timeout: Option<Duration>,

    /// Prefix for the names of worker threads.
    pub thread_name_prefix: &'static str,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            concurrent_workers: 4,
            sync_timeout: None,
            thread_name_prefix: "storeflow",
        }
    }
}

impl DispatcherConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the width of the shared concurrent queue.
    ///
    /// A width of zero is treated as one.
    #[must_use]
    pub const fn concurrent_workers(mut self, workers: usize) -> Self {
        self.concurrent_workers = if workers == 0 { 1 } else { workers };
        self
    }

    /// Sets the bound on synchronous dispatch.
    #[must_use]
    pub const fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Sets the worker thread name prefix.
    #[must_use]
    pub const fn thread_name_prefix(mut self, prefix: &'static str) -> Self {
        self.thread_name_prefix = prefix;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.concurrent_workers, 4);
        assert!(config.sync_timeout.is_none());
        assert_eq!(config.thread_name_prefix, "storeflow");
    }

    #[test]
    fn builder_pattern() {
        let config = DispatcherConfig::new()
            .concurrent_workers(8)
            .sync_timeout(Duration::from_millis(250))
            .thread_name_prefix("test");

        assert_eq!(config.concurrent_workers, 8);
        assert_eq!(config.sync_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.thread_name_prefix, "test");
    }

    #[test]
    fn zero_workers_is_clamped() {
        let config = DispatcherConfig::new().concurrent_workers(0);
        assert_eq!(config.concurrent_workers, 1);
    }
}
