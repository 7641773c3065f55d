//! Actor Handle
//!
//! A handle to a plugin actor running on its own thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::thread::JoinHandle;

use serde::Serialize;

use super::{PluginError, PluginResult};

// ─────────────────────────────────────────────────────────────────────────────
// Actor State
// ─────────────────────────────────────────────────────────────────────────────

/// Current state of a plugin actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ActorState {
    /// Constructed, `on_init` has run
    Created = 0,
    /// Loop is executing
    Running = 1,
    /// Termination requested, current iteration finishing
    Terminating = 2,
    /// Loop has exited
    Stopped = 3,
    /// The actor's thread panicked or could not start
    Failed = 4,
}

impl ActorState {
    /// Convert from u8
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Terminating,
            3 => Self::Stopped,
            _ => Self::Failed,
        }
    }

    /// Check if the actor is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorState::Stopped | ActorState::Failed)
    }

    pub fn is_running(&self) -> bool {
        *self == ActorState::Running
    }
}

impl std::fmt::Display for ActorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorState::Created => write!(f, "created"),
            ActorState::Running => write!(f, "running"),
            ActorState::Terminating => write!(f, "terminating"),
            ActorState::Stopped => write!(f, "stopped"),
            ActorState::Failed => write!(f, "failed"),
        }
    }
}

/// Read the shared state, folding a raised termination flag into `Terminating`
pub(crate) fn observed_state(state: &AtomicU8, terminate: &AtomicBool) -> ActorState {
    match ActorState::from_u8(state.load(Ordering::SeqCst)) {
        ActorState::Running if terminate.load(Ordering::SeqCst) => ActorState::Terminating,
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor Stats
// ─────────────────────────────────────────────────────────────────────────────

/// Counters for the conditions the loop reports
#[derive(Debug, Default)]
pub struct ActorStats {
    ticks: AtomicU64,
    dispatched: AtomicU64,
    unroutable: AtomicU64,
    saturated: AtomicU64,
    degraded: AtomicU64,
    hook_failures: AtomicU64,
}

impl ActorStats {
    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unroutable(&self) {
        self.unroutable.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_saturated(&self) {
        self.saturated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_degraded(&self) {
        self.degraded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_hook_failure(&self) {
        self.hook_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ActorStatsSnapshot {
        ActorStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            saturated: self.saturated.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            hook_failures: self.hook_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ActorStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActorStatsSnapshot {
    /// Tick hook invocations
    pub ticks: u64,
    /// Events handed to a bound handler
    pub dispatched: u64,
    /// Events dropped for lack of a handler
    pub unroutable: u64,
    /// Emits dropped on a full outbound queue
    pub saturated: u64,
    /// Closed-queue reports, inbound or outbound
    pub degraded: u64,
    /// Hooks or handlers that returned an error
    pub hook_failures: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Actor Handle
// ─────────────────────────────────────────────────────────────────────────────

/// What is left of an actor once it has been reaped
#[derive(Debug, Clone, Serialize)]
pub struct ActorExit {
    pub identity: String,
    pub state: ActorState,
    pub stats: ActorStatsSnapshot,
}

/// Handle to a running plugin actor
///
/// Owned by the supervisor. Dropping the handle requests termination and
/// detaches the thread; call [`ActorHandle::close`] to reap it instead.
pub struct ActorHandle {
    identity: String,
    state: Arc<AtomicU8>,
    terminate: Arc<AtomicBool>,
    stats: Arc<ActorStats>,
    thread: Option<JoinHandle<PluginResult<()>>>,
}

impl ActorHandle {
    pub(crate) fn new(
        identity: String,
        state: Arc<AtomicU8>,
        terminate: Arc<AtomicBool>,
        stats: Arc<ActorStats>,
        thread: JoinHandle<PluginResult<()>>,
    ) -> Self {
        Self {
            identity,
            state,
            terminate,
            stats,
            thread: Some(thread),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn state(&self) -> ActorState {
        observed_state(&self.state, &self.terminate)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    pub fn stats(&self) -> ActorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Ask the loop to stop after its current iteration
    pub fn request_termination(&self) {
        if !self.terminate.swap(true, Ordering::SeqCst) {
            tracing::debug!(plugin = %self.identity, "Termination requested by supervisor");
        }
    }

    /// True once the actor's thread has returned
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Join the actor's thread and finalize it
    ///
    /// Blocks until the loop exits. Does not request termination by itself.
    pub fn close(mut self) -> PluginResult<ActorExit> {
        let outcome = match self.thread.take() {
            Some(thread) => thread
                .join()
                .unwrap_or_else(|_| Err(PluginError::Panicked(self.identity.clone()))),
            None => Ok(()),
        };

        let exit = ActorExit {
            identity: self.identity.clone(),
            state: self.state(),
            stats: self.stats(),
        };

        match outcome {
            Ok(()) => {
                tracing::debug!(
                    plugin = %exit.identity,
                    state = %exit.state,
                    ticks = exit.stats.ticks,
                    dispatched = exit.stats.dispatched,
                    "Plugin reaped"
                );
                Ok(exit)
            }
            Err(e) => {
                tracing::error!(plugin = %exit.identity, error = %e, "Plugin ended with an error");
                Err(e)
            }
        }
    }
}

impl Drop for ActorHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.terminate.store(true, Ordering::SeqCst);
        }
    }
}

impl std::fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorHandle")
            .field("identity", &self.identity)
            .field("state", &self.state())
            .finish()
    }
}
