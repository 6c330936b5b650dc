// ABOUTME: Root library module for the roomlog binary
// ABOUTME: Exposes the CLI and console sender, re-exports the core crate's modules

pub mod cli;
pub mod console;

// Re-export platform-agnostic modules from roomlog-core
pub use roomlog_core::commands;
pub use roomlog_core::config;
pub use roomlog_core::engine;
pub use roomlog_core::handlers;
pub use roomlog_core::pipeline;
pub use roomlog_core::sqlite;
pub use roomlog_core::traits;
