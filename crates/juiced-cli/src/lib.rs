//! Command-line client for juiced.
//!
//! This crate provides the `juiced` binary: configuration loading, the
//! headless console and the maintenance commands.

pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod secret;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
