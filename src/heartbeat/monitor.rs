//! Heartbeat liveness monitor.
//!
//! One monitor per connection. It publishes a heartbeat every
//! `heartbeat_interval` whenever nothing else is queued, and checks every
//! `heartbeat_timeout` that something arrived in the last
//! `heartbeat_timeout`. When nothing did, it closes the connection, once.
//!
//! ```text
//! Unarmed ──start()──► Armed ──message──► Alive ◄──┐
//!                        │                  │      │ recheck
//!                        │ silent           ├──────┘
//!                        ▼                  ▼ silent
//!                      Closed ◄─────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

use super::message::{Beat, Bootstrap, HeartbeatMessage, ROOT_CSP};
use super::timer::{TimerHandle, TimerService};
use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::handler::{NetworkContext, SubHandler};
use crate::publisher::{MessageWriter, WireOutPublisher};
use crate::transport::{CloseReason, ConnectionCloser};
use crate::wire::{WireIn, WireOut};

/// `last_received` value that never counts as silent.
const INFINITE_FUTURE: u64 = u64::MAX;

/// Observable state of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// `start()` not called yet.
    Unarmed,
    /// Armed, nothing received since.
    Armed,
    /// Something was received since arming.
    Alive,
    Closed,
}

/// Outcome of one liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    /// This check detected the timeout and closed the connection.
    TimedOut,
    /// Already closed; nothing done.
    Closed,
}

/// Cross-thread state. Times are nanoseconds since the monitor's epoch.
struct HeartbeatState {
    last_received_ns: AtomicU64,
    armed_at_ns: AtomicU64,
    armed: AtomicBool,
    initialized: AtomicBool,
    closed: AtomicBool,
}

struct Inner {
    config: HeartbeatConfig,
    cid: i64,
    is_acceptor: bool,
    epoch: Instant,
    state: HeartbeatState,
    publisher: Arc<dyn WireOutPublisher>,
    closer: Arc<dyn ConnectionCloser>,
    timer: TimerService,
    tasks: Mutex<Vec<TimerHandle>>,
}

impl Inner {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(INFINITE_FUTURE - 1)
    }

    fn check(&self) -> Liveness {
        if self.state.closed.load(Ordering::Acquire) {
            return Liveness::Closed;
        }
        if !self.state.armed.load(Ordering::Acquire) {
            return Liveness::Alive;
        }

        let now = self.now_ns();
        let last = self.state.last_received_ns.load(Ordering::Acquire);
        let since = if last == INFINITE_FUTURE {
            self.state.armed_at_ns.load(Ordering::Acquire)
        } else {
            last
        };
        let silent = Duration::from_nanos(now.saturating_sub(since));
        if silent < self.config.timeout() {
            return Liveness::Alive;
        }

        if self
            .state
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::Acquire)
            .is_err()
        {
            return Liveness::Closed;
        }
        self.state
            .last_received_ns
            .store(INFINITE_FUTURE, Ordering::SeqCst);
        tracing::warn!(
            cid = self.cid,
            silent_ms = silent.as_millis() as u64,
            timeout_ms = self.config.heartbeat_timeout_ms,
            "No message received within heartbeat timeout, closing connection"
        );
        self.cancel_tasks();
        self.closer.close_connection(CloseReason::HeartbeatTimeout);
        Liveness::TimedOut
    }

    fn track(&self, handle: TimerHandle) {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        if self.state.closed.load(Ordering::Acquire) {
            handle.cancel();
            return;
        }
        tasks.push(handle);
    }

    fn cancel_tasks(&self) {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in &tasks {
            task.cancel();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

/// Heartbeat sender and liveness checker of one connection.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    /// Build a monitor from a locally configured record.
    ///
    /// Requires `timeout >= 1000ms`, `interval >= 500ms` and
    /// `timeout > interval`.
    pub fn new(config: HeartbeatConfig, cid: i64, context: &NetworkContext) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, cid, context))
    }

    /// Build a monitor from a record announced by the peer.
    ///
    /// Only the lower bounds are enforced.
    pub fn from_record(config: HeartbeatConfig, cid: i64, context: &NetworkContext) -> Result<Self> {
        config.check_bounds()?;
        Ok(Self::build(config, cid, context))
    }

    fn build(config: HeartbeatConfig, cid: i64, context: &NetworkContext) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                cid,
                is_acceptor: context.is_acceptor,
                epoch: Instant::now(),
                state: HeartbeatState {
                    last_received_ns: AtomicU64::new(INFINITE_FUTURE),
                    armed_at_ns: AtomicU64::new(0),
                    armed: AtomicBool::new(false),
                    initialized: AtomicBool::new(false),
                    closed: AtomicBool::new(false),
                },
                publisher: context.publisher.clone(),
                closer: context.closer.clone(),
                timer: context.timer.clone(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    #[inline]
    pub fn cid(&self) -> i64 {
        self.inner.cid
    }

    #[inline]
    pub fn config(&self) -> HeartbeatConfig {
        self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.closed.load(Ordering::Acquire)
    }

    pub fn state(&self) -> MonitorState {
        let state = &self.inner.state;
        if state.closed.load(Ordering::Acquire) {
            MonitorState::Closed
        } else if !state.armed.load(Ordering::Acquire) {
            MonitorState::Unarmed
        } else if state.last_received_ns.load(Ordering::Acquire) == INFINITE_FUTURE {
            MonitorState::Armed
        } else {
            MonitorState::Alive
        }
    }

    /// Arm the liveness check. Only the first call has an effect; returns
    /// whether this call armed the monitor.
    pub fn start(&self) -> bool {
        let inner = &self.inner;
        if inner.state.closed.load(Ordering::Acquire) {
            return false;
        }
        if inner.state.armed.swap(true, Ordering::AcqRel) {
            return false;
        }
        inner.state.armed_at_ns.store(inner.now_ns(), Ordering::Release);
        inner
            .state
            .last_received_ns
            .store(INFINITE_FUTURE, Ordering::Release);

        let timeout = inner.config.timeout();
        let weak = Arc::downgrade(inner);
        let handle = inner.timer.schedule_with_reschedule(timeout, move || {
            let inner = weak.upgrade()?;
            match inner.check() {
                Liveness::Alive => Some(timeout),
                Liveness::TimedOut | Liveness::Closed => None,
            }
        });
        inner.track(handle);
        tracing::debug!(cid = inner.cid, timeout_ms = inner.config.heartbeat_timeout_ms, "Heartbeat check armed");
        true
    }

    /// Record inbound traffic. Safe to call from any thread.
    pub fn on_message_received(&self) {
        let state = &self.inner.state;
        if state.closed.load(Ordering::SeqCst) {
            return;
        }
        state
            .last_received_ns
            .store(self.inner.now_ns(), Ordering::SeqCst);
        // a close that ran between the check and the store keeps the sentinel
        if state.closed.load(Ordering::SeqCst) {
            state.last_received_ns.store(INFINITE_FUTURE, Ordering::SeqCst);
        }
    }

    /// Run one liveness check now.
    pub fn check_liveness(&self) -> Liveness {
        self.inner.check()
    }

    /// Write the bootstrap document (accepting side only) and start sending
    /// heartbeats. Only the first successful call has an effect.
    pub fn on_initialize(&self, out: &mut WireOut<'_>) -> Result<()> {
        let inner = &self.inner;
        if inner.state.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if inner.is_acceptor {
            out.write_document(
                true,
                &Bootstrap {
                    csp: ROOT_CSP.to_string(),
                    cid: inner.cid,
                    handler: inner.config,
                },
            )?;
            tracing::debug!(cid = inner.cid, "Wrote heartbeat bootstrap");
        }
        if inner.state.initialized.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let message: Arc<dyn MessageWriter> = Arc::new(HeartbeatMessage::new(inner.cid));
        let interval: Duration = inner.config.interval();
        let weak = Arc::downgrade(inner);
        let handle = inner.timer.schedule_at_fixed_rate(interval, interval, move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.state.closed.load(Ordering::Acquire) {
                return;
            }
            // only when nothing else is waiting to go out
            if inner.publisher.is_empty() {
                inner.publisher.publish(message.clone());
            }
        });
        inner.track(handle);
        Ok(())
    }

    /// Consume a heartbeat data document. Its receipt is the signal; the
    /// content is ignored.
    pub fn process_data(&self, input: &mut WireIn<'_>) -> Result<()> {
        let beat: Beat = input.read_document()?;
        tracing::trace!(cid = self.inner.cid, marker = %beat.heartbeat, "Heartbeat received");
        Ok(())
    }

    /// Stop checking and sending. Returns `false` if already closed.
    ///
    /// Does not close the connection itself.
    pub fn close(&self) -> bool {
        let inner = &self.inner;
        if inner.state.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        inner
            .state
            .last_received_ns
            .store(INFINITE_FUTURE, Ordering::SeqCst);
        inner.cancel_tasks();
        tracing::debug!(cid = inner.cid, "Heartbeat monitor closed");
        true
    }
}

impl SubHandler for HeartbeatMonitor {
    fn on_initialize(&mut self, out: &mut WireOut<'_>) -> Result<()> {
        HeartbeatMonitor::on_initialize(self, out)
    }

    fn process_data(&mut self, input: &mut WireIn<'_>, _output: &mut WireOut<'_>) -> Result<()> {
        HeartbeatMonitor::process_data(self, input)
    }

    fn close(&mut self) {
        HeartbeatMonitor::close(self);
    }
}

impl std::fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeartbeatMonitor")
            .field("cid", &self.inner.cid)
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}
