//! Boxhead - a plugin host
//!
//! This crate wires the plugin actor core from `boxhead_runtime` into an
//! application:
//! - Layered TOML configuration with command-line overrides
//! - Logging setup
//! - A supervisor that spawns plugins and routes their events
//! - The built-in plugins

// Re-export the actor core
pub use boxhead_runtime;

pub mod config;
pub mod logging;
pub mod plugins;
pub mod supervisor;
