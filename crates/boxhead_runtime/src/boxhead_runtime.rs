//! Boxhead Runtime - the plugin actor core
//!
//! Each plugin runs a cooperative tick-and-dispatch loop on its own thread and
//! talks to its supervisor through two bounded event queues.

mod config;
mod event;
pub mod plugin;

pub use config::*;
pub use event::*;
pub use plugin::{
    ActorExit, ActorHandle, ActorQueues, ActorState, ActorStatsSnapshot, DEFAULT_TICK_INTERVAL,
    Init, MAX_QUEUE_CAPACITY, Plugin, PluginActor, PluginContext, PluginError, PluginResult,
    TERMINATE_EVENT, bounded_queue,
};
