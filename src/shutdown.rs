//! Shutdown signalling shared by the node's tasks.
//!
//! A [`Shutdown`] carries at most one [`ShutdownReason`]. The first call to
//! [`trigger`](Shutdown::trigger) sets it; later calls are ignored. Every
//! task holding a clone can await [`wait`](Shutdown::wait).

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;

/// Why the node is shutting down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShutdownReason {
    /// `SHOWER OFF` moved the device to its terminal state.
    DeviceStopped,
    /// The process received an interrupt or termination signal.
    Interrupted,
    /// The PWM output failed while applying a command.
    HardwareFailure,
}

impl ShutdownReason {
    /// Process exit code for this reason.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::DeviceStopped | Self::Interrupted => 0,
            Self::HardwareFailure => 1,
        }
    }
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceStopped => f.write_str("device stopped"),
            Self::Interrupted => f.write_str("interrupted"),
            Self::HardwareFailure => f.write_str("hardware failure"),
        }
    }
}

/// Cloneable, first-reason-wins shutdown signal.
#[derive(Clone, Debug)]
pub struct Shutdown {
    tx: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl Shutdown {
    /// Creates an untriggered signal.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Sets `reason` unless a reason is already set.
    ///
    /// Returns true if this call set the reason.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// The reason, if triggered.
    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.tx.borrow()
    }

    /// True once triggered.
    pub fn is_triggered(&self) -> bool {
        self.reason().is_some()
    }

    /// Completes once the signal is triggered, yielding the winning reason.
    pub async fn wait(&self) -> ShutdownReason {
        let mut rx = self.tx.subscribe();
        let reason = rx.wait_for(Option::is_some).await.ok().and_then(|r| *r);
        // the sender lives in `self`, so the channel cannot close here
        reason.unwrap_or(ShutdownReason::Interrupted)
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Completes when the process receives SIGINT, SIGTERM or SIGQUIT
/// (Ctrl-C only on other platforms).
#[cfg(unix)]
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Completes when the process receives Ctrl-C.
#[cfg(not(unix))]
pub async fn wait_for_interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reason_wins() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());

        assert!(shutdown.trigger(ShutdownReason::Interrupted));
        assert!(!shutdown.trigger(ShutdownReason::DeviceStopped));
        assert_eq!(shutdown.reason(), Some(ShutdownReason::Interrupted));
    }

    #[test]
    fn exit_codes() {
        assert_eq!(ShutdownReason::DeviceStopped.exit_code(), 0);
        assert_eq!(ShutdownReason::Interrupted.exit_code(), 0);
        assert_eq!(ShutdownReason::HardwareFailure.exit_code(), 1);
    }

    #[tokio::test]
    async fn wait_sees_trigger_from_clone() {
        let shutdown = Shutdown::new();
        let other = shutdown.clone();

        let waiter = tokio::spawn(async move { other.wait().await });
        tokio::task::yield_now().await;
        shutdown.trigger(ShutdownReason::HardwareFailure);

        assert_eq!(waiter.await.unwrap(), ShutdownReason::HardwareFailure);
    }

    #[tokio::test]
    async fn wait_returns_immediately_when_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger(ShutdownReason::DeviceStopped);
        assert_eq!(shutdown.wait().await, ShutdownReason::DeviceStopped);
    }
}
