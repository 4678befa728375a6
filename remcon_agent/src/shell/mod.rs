//! # Shell Module
//!
//! Entry point for the `remcon_agent` binary: argument parsing, configuration
//! resolution, logging setup and the hand-off to [`crate::agent::run`].

pub mod cli;

pub use cli::{Cli, run};
