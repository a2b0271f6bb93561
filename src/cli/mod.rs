//! Command-line interface for music-catalog.
//!
//! Drives the catalog subsystem from a terminal: scan, watch, add and remove
//! roots, list the catalog, and edit scan settings.

mod commands;

pub use commands::{Cli, Commands, run_command};
