//! Connection close signalling.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

/// Why a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the stream.
    PeerClosed,
    /// Nothing was received within the heartbeat timeout.
    HeartbeatTimeout,
    /// The inbound stream was corrupt.
    Corrupted,
    /// Closed locally by the application.
    Application,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::PeerClosed => "peer closed",
            CloseReason::HeartbeatTimeout => "heartbeat timeout",
            CloseReason::Corrupted => "corrupted stream",
            CloseReason::Application => "application close",
        };
        f.write_str(text)
    }
}

/// The close operation of one connection.
///
/// Implementations must be idempotent and callable from any thread.
pub trait ConnectionCloser: Send + Sync {
    fn close_connection(&self, reason: CloseReason);
}

/// One-shot close flag the transport can await.
///
/// The first reason wins; later calls are ignored.
#[derive(Default)]
pub struct CloseSignal {
    closed: AtomicBool,
    reason: Mutex<Option<CloseReason>>,
    notify: Notify,
}

impl CloseSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The reason recorded by the first close, if any.
    pub fn reason(&self) -> Option<CloseReason> {
        *self.reason.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until the connection is closed and return the reason.
    pub async fn closed(&self) -> CloseReason {
        loop {
            let notified = self.notify.notified();
            if let Some(reason) = self.reason() {
                return reason;
            }
            notified.await;
        }
    }
}

impl ConnectionCloser for CloseSignal {
    fn close_connection(&self, reason: CloseReason) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        *self.reason.lock().unwrap_or_else(|e| e.into_inner()) = Some(reason);
        tracing::debug!(%reason, "Connection close requested");
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_first_reason_wins() {
        let signal = CloseSignal::new();
        assert!(!signal.is_closed());
        assert_eq!(signal.reason(), None);

        signal.close_connection(CloseReason::HeartbeatTimeout);
        signal.close_connection(CloseReason::Application);

        assert!(signal.is_closed());
        assert_eq!(signal.reason(), Some(CloseReason::HeartbeatTimeout));
    }

    #[tokio::test]
    async fn test_closed_resolves_for_waiters() {
        let signal = Arc::new(CloseSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.closed().await })
        };
        tokio::task::yield_now().await;
        signal.close_connection(CloseReason::PeerClosed);

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
    }

    #[tokio::test]
    async fn test_closed_after_close_returns_immediately() {
        let signal = CloseSignal::new();
        signal.close_connection(CloseReason::Corrupted);
        assert_eq!(signal.closed().await, CloseReason::Corrupted);
    }
}
