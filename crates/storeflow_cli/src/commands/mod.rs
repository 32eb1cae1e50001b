//! CLI command implementations.

pub mod run;
pub mod signpost;
