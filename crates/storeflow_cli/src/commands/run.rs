//! Run command implementation.

use crate::StrategyArg;
use serde::Serialize;
use std::thread;
use std::time::{Duration, Instant};
use storeflow_core::{
    ActionType, DispatchStrategy, Dispatcher, DispatcherConfig, Store, TransactionContext,
    TransactionHandle,
};
use tracing::info;

/// Options for a batch run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of transactions to dispatch.
    pub count: usize,
    /// Strategy applied to every transaction.
    pub strategy: StrategyArg,
    /// Queue name for the serial strategy.
    pub queue: String,
    /// Cancel every k-th transaction (0 = never).
    pub cancel_every: usize,
    /// Simulated work per transaction.
    pub work: Duration,
    /// Width of the concurrent queue.
    pub workers: usize,
}

/// Model mutated by the run command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Counter {
    /// Sum of the applied increments.
    pub value: i64,
    /// Sequence numbers in the order they were applied.
    pub applied: Vec<usize>,
}

/// Adds one to the counter after simulated work.
struct Increment {
    seq: usize,
    work: Duration,
}

impl ActionType<Counter> for Increment {
    fn id(&self) -> &str {
        "INCREMENT"
    }

    fn reduce(&self, context: TransactionContext<Counter>) {
        let deadline = Instant::now() + self.work;
        while Instant::now() < deadline {
            if context.is_cancelled() {
                context.fulfill();
                return;
            }
            thread::sleep(Duration::from_millis(1));
        }
        let seq = self.seq;
        context.reduce_model(|counter| {
            counter.value += 1;
            counter.applied.push(seq);
        });
        context.fulfill();
    }
}

/// Outcome of a single dispatched transaction.
#[derive(Debug, Serialize)]
pub struct TransactionReport {
    /// Sequence number in submission order.
    pub seq: usize,
    /// Transaction id.
    pub id: String,
    /// Final state.
    pub state: String,
    /// Recorded error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Batch run result.
#[derive(Debug, Serialize)]
pub struct RunResult {
    /// Strategy used for every transaction.
    pub strategy: String,
    /// Wall-clock time of the whole batch in milliseconds.
    pub elapsed_ms: u128,
    /// Per-transaction outcomes.
    pub transactions: Vec<TransactionReport>,
    /// Final model.
    pub model: Counter,
}

/// Runs the run command.
pub fn run(options: &RunOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let strategy = match options.strategy {
        StrategyArg::Sync => DispatchStrategy::Sync,
        StrategyArg::Async => DispatchStrategy::Async(None),
        StrategyArg::Serial => DispatchStrategy::serial(options.queue.clone()),
    };

    let config = DispatcherConfig::new()
        .concurrent_workers(options.workers)
        .thread_name_prefix("storeflow-cli");
    let dispatcher = std::sync::Arc::new(Dispatcher::new(config)?);
    let store = Store::new(Counter::default(), dispatcher);

    info!(count = options.count, %strategy, "dispatching batch");
    let started = Instant::now();

    let mut handles: Vec<TransactionHandle> = Vec::with_capacity(options.count);
    for seq in 0..options.count {
        let action = Increment {
            seq,
            work: options.work,
        };
        let handle = store.run(action, strategy.clone())?;
        if options.cancel_every > 0 && (seq + 1) % options.cancel_every == 0 {
            handle.cancel();
        }
        handles.push(handle);
    }

    store.dispatcher().wait_all();
    for handle in &handles {
        handle.wait();
    }
    let elapsed = started.elapsed();
    store.dispatcher().shutdown();

    let transactions = handles
        .iter()
        .enumerate()
        .map(|(seq, handle)| TransactionReport {
            seq,
            id: handle.id().to_string(),
            state: handle.state().to_string(),
            error: handle.error().map(|e| e.to_string()),
        })
        .collect();

    let result = RunResult {
        strategy: strategy.to_string(),
        elapsed_ms: elapsed.as_millis(),
        transactions,
        model: store.model(),
    };
    info!(
        value = result.model.value,
        elapsed_ms = result.elapsed_ms,
        "batch finished"
    );

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &RunResult) {
    println!("StoreFlow Batch Run");
    println!("===================");
    println!();
    println!("Strategy:      {}", result.strategy);
    println!("Elapsed:       {} ms", result.elapsed_ms);
    println!("Final value:   {}", result.model.value);
    println!();

    println!("{:>5}  {:<22}  {:<10}  Error", "Seq", "Id", "State");
    println!("{}", "-".repeat(50));
    for txn in &result.transactions {
        println!(
            "{:>5}  {:<22}  {:<10}  {}",
            txn.seq,
            txn.id,
            txn.state,
            txn.error.as_deref().unwrap_or("-")
        );
    }

    println!();
    let order: Vec<String> = result.model.applied.iter().map(|s| s.to_string()).collect();
    println!("Applied order: {}", order.join(", "));
}
