//! Example plugin
//!
//! Tells a smile on every `joke` and answers `ping` with `pong`.

use std::sync::Arc;

use parking_lot::Mutex;

use boxhead_runtime::{
    ConfigSnapshot, DEFAULT_TICK_INTERVAL, Event, Init, Plugin, PluginContext, PluginResult,
};

pub const DEFAULT_SMILE: &str = ":)";

/// Shared record of what the plugin said
pub type Output = Arc<Mutex<Vec<String>>>;

#[derive(Debug, Default)]
pub struct Example {
    smile: String,
    output: Output,
}

impl Example {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every smile into `output` as well as the log
    pub fn with_output(output: Output) -> Self {
        Self {
            smile: String::new(),
            output,
        }
    }

    pub fn smile(&self) -> &str {
        &self.smile
    }

    fn on_joke(&mut self, ctx: &mut PluginContext, _event: &Event) -> PluginResult<()> {
        tracing::info!(plugin = %ctx.identity(), "{}", self.smile);
        self.output.lock().push(self.smile.clone());
        Ok(())
    }

    fn on_ping(&mut self, ctx: &mut PluginContext, event: &Event) -> PluginResult<()> {
        ctx.emit("pong", event.values().to_vec(), event.params().clone());
        Ok(())
    }
}

impl Plugin for Example {
    fn on_init(&mut self, init: &mut Init<'_, Self>, config: &dyn ConfigSnapshot) -> PluginResult<()> {
        tracing::debug!(plugin = %init.identity(), "Hey there!");

        let section = init.identity().to_string();
        self.smile = config.get_str(&["plugins", section.as_str(), "smile"], DEFAULT_SMILE);
        init.set_tick_interval(config.get_duration_ms(
            &["plugins", section.as_str(), "tick_interval_ms"],
            DEFAULT_TICK_INTERVAL,
        ));

        init.register_for("joke", Self::on_joke);
        init.register_for("ping", Self::on_ping);
        Ok(())
    }

    fn on_tick(&mut self, ctx: &mut PluginContext) -> PluginResult<()> {
        tracing::trace!(plugin = %ctx.identity(), "I'm doing something immensely useful.");
        Ok(())
    }
}
