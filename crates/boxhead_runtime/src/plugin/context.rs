//! Plugin Context
//!
//! The part of the actor a hook may touch: its identity, the outbound queue
//! and the termination flag.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio::sync::mpsc::{self, error::TrySendError};

use super::ActorStats;
use crate::event::Event;

/// Context passed to every hook and handler
pub struct PluginContext {
    identity: String,
    outbound: mpsc::Sender<Event>,
    terminate: Arc<AtomicBool>,
    stats: Arc<ActorStats>,
}

impl PluginContext {
    pub(crate) fn new(identity: String, outbound: mpsc::Sender<Event>) -> Self {
        Self {
            identity,
            outbound,
            terminate: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ActorStats::default()),
        }
    }

    /// The name the supervisor gave this plugin
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Send an event to the supervisor without blocking
    ///
    /// A full queue is reported as saturation and the event is dropped. A
    /// closed queue is reported as degraded. Neither reaches the caller.
    pub fn emit(&self, name: impl Into<String>, values: Vec<Value>, params: BTreeMap<String, Value>) {
        match Event::new(name, values, params) {
            Ok(event) => self.emit_event(event),
            Err(e) => {
                tracing::error!(plugin = %self.identity, error = %e, "Refusing to emit event");
            }
        }
    }

    /// Send a prebuilt event to the supervisor without blocking
    pub fn emit_event(&self, event: Event) {
        match self.outbound.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.stats.record_saturated();
                tracing::error!(
                    plugin = %self.identity,
                    event = %event.name(),
                    "Queue to supervisor is full, dropping event"
                );
            }
            Err(TrySendError::Closed(event)) => {
                self.stats.record_degraded();
                tracing::error!(
                    plugin = %self.identity,
                    event = %event.name(),
                    "Queue to supervisor is closed, dropping event"
                );
            }
        }
    }

    /// Ask the loop to stop after the current iteration
    pub fn request_termination(&self) {
        if !self.terminate.swap(true, Ordering::SeqCst) {
            tracing::debug!(plugin = %self.identity, "Termination requested");
        }
    }

    pub fn termination_requested(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }

    pub(crate) fn termination_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminate)
    }

    pub(crate) fn stats(&self) -> &Arc<ActorStats> {
        &self.stats
    }
}
