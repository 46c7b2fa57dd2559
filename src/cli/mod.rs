//! CLI module for gridbench - command-line interface and subcommands.
//!
//! Every subcommand is an administrative trigger for one scheduler stage.

pub mod commands;

pub use commands::Cli;
