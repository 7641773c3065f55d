//! Event-name dispatch
//!
//! Handlers are bound by exact event name while the plugin initializes.
//! Nothing is looked up by naming convention at runtime.

use std::collections::HashMap;

use super::{PluginContext, PluginError, PluginResult};
use crate::event::Event;

/// A bound event handler
pub type Handler<P> =
    Box<dyn FnMut(&mut P, &mut PluginContext, &Event) -> PluginResult<()> + Send>;

/// Outcome of routing one event
pub(crate) enum Dispatch {
    Handled,
    Failed(PluginError),
    Unroutable,
}

/// Event name to handler mapping for one plugin
pub(crate) struct HandlerTable<P> {
    handlers: HashMap<String, Handler<P>>,
}

impl<P> HandlerTable<P> {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Bind a handler; returns true if an earlier one was replaced
    pub(crate) fn insert(&mut self, event: impl Into<String>, handler: Handler<P>) -> bool {
        self.handlers.insert(event.into(), handler).is_some()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Bound event names, sorted
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Invoke the handler bound to the event's name, if any
    pub(crate) fn dispatch(
        &mut self,
        plugin: &mut P,
        ctx: &mut PluginContext,
        event: &Event,
    ) -> Dispatch {
        match self.handlers.get_mut(event.name()) {
            Some(handler) => match handler(plugin, ctx, event) {
                Ok(()) => Dispatch::Handled,
                Err(e) => Dispatch::Failed(e),
            },
            None => Dispatch::Unroutable,
        }
    }
}
