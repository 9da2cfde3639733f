//! Subcommand handlers.
//!
//! Each submodule implements one command group of the CLI.

pub mod migrate;
pub mod prefix;
pub mod run;
pub mod tokens;
