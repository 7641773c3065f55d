//! Plugin Actors
//!
//! A plugin is an isolated worker running a cooperative tick-and-dispatch
//! loop on its own thread. It talks to the supervisor only through two
//! bounded queues.
//!
//! # Lifecycle
//!
//! Plugins have the following hooks:
//! - `on_init`: Called once at construction with the configuration snapshot
//! - `on_run`: Called once on the plugin's own thread before the first tick
//! - `on_tick`: Called at the top of every loop iteration
//! - `on_unroutable`: Called for an event no handler is bound to
//! - `on_stop`: Called once on the plugin's thread after the loop exits
//!
//! Event handlers are bound by name in `on_init` through [`Init::register_for`].

mod actor;
mod context;
mod dispatch;
mod handle;
mod signal;

pub use actor::*;
pub use context::*;
pub use dispatch::Handler;
pub use handle::*;

use std::time::Duration;

use crate::config::ConfigSnapshot;
use crate::event::{Event, EventError};
use dispatch::HandlerTable;

/// Name of the event every plugin answers by stopping
pub const TERMINATE_EVENT: &str = "terminate";

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Error
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can occur during a plugin's lifecycle
#[derive(Debug, Clone, thiserror::Error)]
pub enum PluginError {
    #[error("Plugin initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] EventError),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Plugin thread panicked: {0}")]
    Panicked(String),
}

impl PluginError {
    /// Shorthand for a failed hook or handler
    pub fn hook(message: impl Into<String>) -> Self {
        Self::Hook(message.into())
    }
}

impl From<std::io::Error> for PluginError {
    fn from(err: std::io::Error) -> Self {
        Self::Runtime(err.to_string())
    }
}

/// Result type for plugin hooks and lifecycle operations
pub type PluginResult<T> = Result<T, PluginError>;

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Trait
// ─────────────────────────────────────────────────────────────────────────────

/// The hooks a plugin implements
///
/// Only `on_init` is required. Hooks run synchronously on the plugin's own
/// thread and must not block indefinitely: a slow hook delays the next tick
/// and the next receive, and termination is only observed between iterations.
pub trait Plugin: Send + Sized + 'static {
    /// Called once while the actor is being constructed
    ///
    /// Copy whatever is needed out of `config`; the snapshot is only borrowed
    /// for the duration of this call. Bind event handlers and set the tick
    /// interval through `init`.
    fn on_init(&mut self, init: &mut Init<'_, Self>, config: &dyn ConfigSnapshot)
    -> PluginResult<()>;

    /// Called on the plugin's thread before the first tick
    ///
    /// Open thread-bound resources (devices, sockets) here rather than in `on_init`.
    fn on_run(&mut self, _ctx: &mut PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called at the start of every loop iteration
    fn on_tick(&mut self, _ctx: &mut PluginContext) -> PluginResult<()> {
        Ok(())
    }

    /// Called when an event arrives that no handler is bound to
    ///
    /// The event is dropped afterwards either way.
    fn on_unroutable(&mut self, ctx: &mut PluginContext, event: &Event) -> PluginResult<()> {
        tracing::error!(
            plugin = %ctx.identity(),
            event = %event.name(),
            "No handler for event"
        );
        Ok(())
    }

    /// Called on the plugin's thread once the loop has exited
    fn on_stop(&mut self, _ctx: &mut PluginContext) -> PluginResult<()> {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Init
// ─────────────────────────────────────────────────────────────────────────────

/// What a plugin may change while it is being constructed
pub struct Init<'a, P: Plugin> {
    identity: &'a str,
    handlers: &'a mut HandlerTable<P>,
    tick_interval: &'a mut Duration,
}

impl<'a, P: Plugin> Init<'a, P> {
    pub(crate) fn new(
        identity: &'a str,
        handlers: &'a mut HandlerTable<P>,
        tick_interval: &'a mut Duration,
    ) -> Self {
        Self {
            identity,
            handlers,
            tick_interval,
        }
    }

    /// The name the supervisor gave this plugin
    pub fn identity(&self) -> &str {
        self.identity
    }

    /// Bind a handler to an event name
    ///
    /// Binding a name twice replaces the earlier handler, including the
    /// built-in `terminate` handler.
    pub fn register_for<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: FnMut(&mut P, &mut PluginContext, &Event) -> PluginResult<()> + Send + 'static,
    {
        let event = event.into();
        if self.handlers.insert(event.clone(), Box::new(handler)) {
            tracing::debug!(plugin = %self.identity, %event, "Replaced event handler");
        } else {
            tracing::debug!(plugin = %self.identity, %event, "Registered for event");
        }
    }

    /// Set the longest time the loop waits for an event between ticks
    pub fn set_tick_interval(&mut self, interval: Duration) {
        *self.tick_interval = interval;
    }

    pub fn tick_interval(&self) -> Duration {
        *self.tick_interval
    }
}
