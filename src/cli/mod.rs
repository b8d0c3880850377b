//! Command-line interface for hierexec
//!
//! Runs task trees described in plan files and inspects the layered
//! configuration.

pub mod commands;
pub mod output;
pub mod plan;

pub use commands::Cli;
pub use output::Output;
