//! CLI command implementations for livetv-exporter.
//!
//! - `check`: Connectivity and credential validation
//! - `config`: Configuration file generation
//! - `test`: Run refresh cycles against the live server

pub mod check;
pub mod config;

// Re-export command functions
pub use check::command_check;
pub use config::command_config;
pub use test::command_test;
