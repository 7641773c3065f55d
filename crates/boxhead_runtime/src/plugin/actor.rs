//! Plugin Actor
//!
//! Owns one plugin, its handler table and its queue endpoints, and runs the
//! tick-and-dispatch loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use super::dispatch::{Dispatch, HandlerTable};
use super::handle::observed_state;
use super::{
    ActorHandle, ActorState, Init, Plugin, PluginContext, PluginError, PluginResult, TERMINATE_EVENT,
    signal,
};
use crate::config::ConfigSnapshot;
use crate::event::Event;

/// Tick interval used unless `on_init` sets another
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Largest capacity [`bounded_queue`] will allocate
pub const MAX_QUEUE_CAPACITY: usize = 1 << 20;

/// Create a bounded event queue
///
/// The capacity is clamped to `1..=MAX_QUEUE_CAPACITY`.
pub fn bounded_queue(capacity: usize) -> (mpsc::Sender<Event>, mpsc::Receiver<Event>) {
    mpsc::channel(capacity.clamp(1, MAX_QUEUE_CAPACITY))
}

/// The two queue endpoints an actor is constructed with
pub struct ActorQueues {
    /// Supervisor → plugin
    pub inbound: mpsc::Receiver<Event>,
    /// Plugin → supervisor
    pub outbound: mpsc::Sender<Event>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Plugin Actor
// ─────────────────────────────────────────────────────────────────────────────

/// A constructed plugin, ready to be started
pub struct PluginActor<P: Plugin> {
    plugin: P,
    ctx: PluginContext,
    handlers: HandlerTable<P>,
    inbound: mpsc::Receiver<Event>,
    tick_interval: Duration,
    state: Arc<AtomicU8>,
}

impl<P: Plugin> PluginActor<P> {
    /// Construct the actor and run `on_init`
    ///
    /// The loop is not started.
    pub fn new(
        identity: impl Into<String>,
        mut plugin: P,
        config: &dyn ConfigSnapshot,
        queues: ActorQueues,
    ) -> PluginResult<Self> {
        let identity = identity.into();
        let mut handlers = HandlerTable::new();
        handlers.insert(
            TERMINATE_EVENT,
            Box::new(|_: &mut P, ctx: &mut PluginContext, _: &Event| {
                ctx.request_termination();
                Ok(())
            }),
        );
        let mut tick_interval = DEFAULT_TICK_INTERVAL;

        tracing::debug!(plugin = %identity, "Initialising plugin");
        {
            let mut init = Init::new(&identity, &mut handlers, &mut tick_interval);
            plugin.on_init(&mut init, config).map_err(|e| {
                PluginError::InitializationFailed(format!("{}: {}", identity, e))
            })?;
        }
        tracing::debug!(
            plugin = %identity,
            tick_interval_ms = tick_interval.as_millis() as u64,
            events = ?handlers.names(),
            "Initialised plugin"
        );

        Ok(Self {
            plugin,
            ctx: PluginContext::new(identity, queues.outbound),
            handlers,
            inbound: queues.inbound,
            tick_interval,
            state: Arc::new(AtomicU8::new(ActorState::Created as u8)),
        })
    }

    pub fn identity(&self) -> &str {
        self.ctx.identity()
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Event names this actor has a handler for, sorted
    pub fn subscriptions(&self) -> Vec<String> {
        self.handlers.names()
    }

    pub fn state(&self) -> ActorState {
        observed_state(&self.state, &self.ctx.termination_flag())
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    /// Ask the loop to stop at its next checkpoint
    pub fn request_termination(&self) {
        self.ctx.request_termination();
    }

    /// Move the actor onto its own named thread and start it there
    pub fn spawn(mut self) -> PluginResult<ActorHandle> {
        let identity = self.identity().to_string();
        let state = Arc::clone(&self.state);
        let terminate = self.ctx.termination_flag();
        let stats = Arc::clone(self.ctx.stats());

        let thread_state = Arc::clone(&state);
        let thread_identity = identity.clone();
        let thread = thread::Builder::new()
            .name(format!("plugin-{}", identity))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.start()))
                    .unwrap_or_else(|payload| Err(PluginError::Panicked(panic_message(&*payload))));
                if let Err(ref e) = outcome {
                    thread_state.store(ActorState::Failed as u8, Ordering::SeqCst);
                    tracing::error!(plugin = %thread_identity, error = %e, "Plugin failed");
                }
                outcome
            })?;

        Ok(ActorHandle::new(identity, state, terminate, stats, thread))
    }

    /// Install signal handlers and run the loop until termination
    ///
    /// Blocks the calling thread, which must not already be driving a tokio
    /// runtime. [`PluginActor::spawn`] calls this on a fresh thread.
    pub fn start(&mut self) -> PluginResult<()> {
        let current = ActorState::from_u8(self.state.load(Ordering::SeqCst));
        if current != ActorState::Created {
            return Err(PluginError::Runtime(format!(
                "{} cannot start from state {}",
                self.identity(),
                current
            )));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run())
    }

    async fn run(&mut self) -> PluginResult<()> {
        let signals = signal::install(self.identity().to_string(), self.ctx.termination_flag())?;

        self.set_state(ActorState::Running);
        tracing::debug!(plugin = %self.identity(), "Plugin running");

        if let Err(e) = self.plugin.on_run(&mut self.ctx) {
            self.hook_failed("run", &e);
        }

        while !self.ctx.termination_requested() {
            self.iterate().await;
        }

        self.set_state(ActorState::Terminating);
        signals.abort();
        tracing::debug!(plugin = %self.identity(), "Plugin exited main loop");

        if let Err(e) = self.plugin.on_stop(&mut self.ctx) {
            self.hook_failed("stop", &e);
        }

        self.set_state(ActorState::Stopped);
        Ok(())
    }

    /// One pass: tick, then wait up to one tick interval for an event
    async fn iterate(&mut self) {
        self.ctx.stats().record_tick();
        if let Err(e) = self.plugin.on_tick(&mut self.ctx) {
            self.hook_failed("tick", &e);
        }

        let waiting_since = Instant::now();
        match tokio::time::timeout(self.tick_interval, self.inbound.recv()).await {
            Ok(Some(event)) => self.dispatch(event),
            Ok(None) => {
                self.ctx.stats().record_degraded();
                tracing::error!(plugin = %self.identity(), "Plugin holds a closed queue");
                // keep the tick cadence instead of spinning on the closed queue
                let remaining = self.tick_interval.saturating_sub(waiting_since.elapsed());
                tokio::time::sleep(remaining).await;
            }
            Err(_) => {}
        }

        // lets a pending signal listener raise the flag before the checkpoint
        tokio::task::yield_now().await;
    }

    fn dispatch(&mut self, event: Event) {
        tracing::trace!(plugin = %self.identity(), event = %event, "Dispatching event");

        match self.handlers.dispatch(&mut self.plugin, &mut self.ctx, &event) {
            Dispatch::Handled => self.ctx.stats().record_dispatched(),
            Dispatch::Failed(e) => {
                self.ctx.stats().record_dispatched();
                self.hook_failed(event.name(), &e);
            }
            Dispatch::Unroutable => {
                self.ctx.stats().record_unroutable();
                if let Err(e) = self.plugin.on_unroutable(&mut self.ctx, &event) {
                    self.hook_failed("unroutable", &e);
                }
            }
        }
    }

    fn hook_failed(&self, hook: &str, error: &PluginError) {
        self.ctx.stats().record_hook_failure();
        tracing::warn!(
            plugin = %self.identity(),
            hook,
            error = %error,
            "Plugin hook failed"
        );
    }

    fn set_state(&self, state: ActorState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
