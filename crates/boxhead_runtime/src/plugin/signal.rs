//! Interrupt and terminate signals mapped onto the termination flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;

use super::PluginResult;

/// Start listening for SIGINT and SIGTERM on the current runtime
///
/// The listener only raises the flag; the loop notices it at its next
/// checkpoint. Abort the returned task to stop listening.
#[cfg(unix)]
pub(crate) fn install(identity: String, flag: Arc<AtomicBool>) -> PluginResult<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        tracing::info!(plugin = %identity, signal = received, "Termination requested by signal");
        flag.store(true, Ordering::SeqCst);
    }))
}

#[cfg(not(unix))]
pub(crate) fn install(identity: String, flag: Arc<AtomicBool>) -> PluginResult<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(plugin = %identity, signal = "ctrl-c", "Termination requested by signal");
            flag.store(true, Ordering::SeqCst);
        }
    }))
}
