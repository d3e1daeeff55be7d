//! Cooperative cancellation token shared by the worker pool and the
//! resilience layer.
//!
//! Built on a zero-capacity channel: nothing is ever sent, so a receive only
//! completes once every sender has been dropped. Cloned receivers all observe
//! the same disconnect, which makes the token cheap to hand to any thread
//! that needs to interrupt a blocking wait.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};

/// Owning side of the token. Dropping it (or calling [`ShutdownHandle::trigger`])
/// cancels every associated [`Shutdown`].
pub struct ShutdownHandle {
    _tx: Sender<()>,
}

impl ShutdownHandle {
    /// Cancel all associated tokens.
    pub fn trigger(self) {
        // Dropping the sender disconnects the channel.
    }
}

/// Observer side of the token.
#[derive(Clone)]
pub struct Shutdown {
    rx: Receiver<()>,
}

impl Shutdown {
    /// Create a linked handle/token pair.
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = bounded(0);
        (ShutdownHandle { _tx: tx }, Shutdown { rx })
    }

    /// A token that is never cancelled, for callers without a lifecycle to
    /// observe (one-shot CLI invocations, tests).
    pub fn never() -> Shutdown {
        let (tx, rx) = bounded(0);
        std::mem::forget(tx);
        Shutdown { rx }
    }

    /// True once the handle has been triggered or dropped.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep for `timeout`, waking early on cancellation.
    ///
    /// Returns `true` if the token was cancelled during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.rx.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Raw channel receiver, for use inside `select!` loops.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncancelled() {
        let (_handle, shutdown) = Shutdown::new();
        assert!(!shutdown.is_cancelled());
        assert!(!shutdown.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn trigger_cancels_all_clones() {
        let (handle, shutdown) = Shutdown::new();
        let other = shutdown.clone();
        handle.trigger();
        assert!(shutdown.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn wait_returns_early_on_cancel() {
        let (handle, shutdown) = Shutdown::new();
        let waiter = std::thread::spawn(move || shutdown.wait_timeout(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(20));
        handle.trigger();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn never_token_does_not_cancel() {
        let shutdown = Shutdown::never();
        assert!(!shutdown.is_cancelled());
    }
}
