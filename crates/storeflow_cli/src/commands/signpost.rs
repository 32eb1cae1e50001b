//! Signpost command implementation.

use std::sync::Arc;
use storeflow_core::{Dispatcher, DispatcherConfig, SignpostTransaction};
use tracing::info;

/// Runs the signpost command.
pub fn run(name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let dispatcher = Dispatcher::new(DispatcherConfig::new().concurrent_workers(1))?;
    let signpost = Arc::new(SignpostTransaction::new(name));

    let handle = dispatcher.dispatch(signpost)?;
    let state = handle.wait();
    info!(signpost = name, id = handle.id(), %state, "signpost passed");

    println!("Signpost:  {}", name);
    println!("Id:        {}", handle.id());
    println!("State:     {}", state);

    dispatcher.shutdown();
    Ok(())
}
