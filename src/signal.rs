//! Shutdown signalling.
//!
//! [`Shutdown`] is a cheap, cloneable view of a shutdown flag. The loop and
//! the restart coordinator check it between steps and race it against their
//! sleeps. [`listen_for_signals`] flips the flag on SIGINT or SIGTERM.

use tokio::sync::watch;
use tracing::info;

/// Receiving side of the shutdown flag.
#[derive(Clone, Debug)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side of the shutdown flag.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger and receiver.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl Shutdown {
    /// A receiver that never fires.
    pub fn never() -> Self {
        let (_trigger, shutdown) = channel();
        shutdown
    }

    /// Non-blocking check.
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown is requested.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let closed = rx.wait_for(|requested| *requested).await.is_err();
        if closed {
            // Trigger dropped without firing: shutdown can no longer happen.
            std::future::pending::<()>().await;
        }
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

/// Wait for SIGINT or SIGTERM, then fire `trigger`.
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be registered.
#[cfg(unix)]
pub async fn listen_for_signals(trigger: ShutdownTrigger) -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = terminate.recv() => info!(signal = "SIGTERM", "Shutdown requested"),
        _ = interrupt.recv() => info!(signal = "SIGINT", "Shutdown requested"),
    }
    trigger.trigger();
    Ok(())
}

/// Wait for Ctrl+C, then fire `trigger`.
#[cfg(not(unix))]
pub async fn listen_for_signals(trigger: ShutdownTrigger) -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!(signal = "ctrl_c", "Shutdown requested");
    trigger.trigger();
    Ok(())
}
