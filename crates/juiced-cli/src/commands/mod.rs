//! Subcommand implementations.

pub mod config;
pub mod queue;
pub mod run;
pub mod status;
