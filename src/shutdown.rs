//! Cooperative shutdown signalling
//!
//! A `ShutdownHandle`/`ShutdownToken` pair built on a watch channel. The
//! handle triggers shutdown once; tokens are cheap to clone and observe the
//! trigger even if they subscribe after it fired. Every blocking await in the
//! pipeline and BSP engines selects on a token.

use tokio::sync::watch;

/// Creates a connected handle/token pair.
pub fn channel() -> (ShutdownHandle, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, ShutdownToken { rx })
}

/// The triggering side of a shutdown channel.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    /// Signals shutdown to every token cloned from this channel.
    ///
    /// Triggering more than once is harmless.
    pub fn shutdown(&self) {
        // Ignore the error: no live tokens means nothing left to notify.
        let _ = self.tx.send(true);
    }

    /// Returns a fresh token observing this handle.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.tx.subscribe(),
        }
    }
}

/// The observing side of a shutdown channel.
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Returns true once shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is triggered (or the handle is dropped).
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Handle dropped without an explicit trigger; treat the run
                // as over rather than waiting forever.
                return;
            }
        }
    }

    /// Returns a token that never fires, for runs without external control.
    pub fn never() -> ShutdownToken {
        let (tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open for the token's lifetime.
        std::mem::forget(tx);
        ShutdownToken { rx }
    }
}
