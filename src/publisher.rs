//! Outbound message queue.
//!
//! Producers on any thread enqueue [`MessageWriter`]s; the connection's I/O
//! thread materializes them into the output buffer when the framing engine
//! asks for output.
//!
//! # Architecture
//!
//! ```text
//! App thread  ─┐
//! Timer thread ┼─► QueuePublisher (FIFO) ─► apply_action ─► output cursor
//! App thread  ─┘
//! ```
//!
//! - **Ordering**: writers are materialized exactly once, in enqueue order
//! - **Single drainer**: a drain lock admits one `apply_action` at a time
//! - **Headroom**: draining stops once less than a quarter of the output is free

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use crate::error::{Result, WireError};
use crate::wire::WireOut;

/// Something that writes one logical message (usually two documents).
pub trait MessageWriter: Send + Sync {
    fn write_message(&self, out: &mut WireOut<'_>) -> Result<()>;
}

impl<F> MessageWriter for F
where
    F: Fn(&mut WireOut<'_>) -> Result<()> + Send + Sync,
{
    fn write_message(&self, out: &mut WireOut<'_>) -> Result<()> {
        self(out)
    }
}

/// Action run by [`WireOutPublisher::apply_action`] before draining.
pub type OutputAction<'f> = dyn FnMut(&mut WireOut<'_>) -> Result<()> + 'f;

/// Multi-producer outbound queue of one connection.
pub trait WireOutPublisher: Send + Sync {
    /// Whether nothing is queued.
    fn is_empty(&self) -> bool;

    /// Enqueue a writer to be materialized later.
    fn publish(&self, writer: Arc<dyn MessageWriter>);

    /// Run `action` with exclusive append rights on `out`, then drain
    /// queued writers, at least one if any is queued.
    fn apply_action(&self, out: &mut WireOut<'_>, action: &mut OutputAction<'_>) -> Result<()>;

    /// Discard queued writers and refuse new ones.
    fn close(&self);
}

/// FIFO implementation of [`WireOutPublisher`].
#[derive(Default)]
pub struct QueuePublisher {
    queue: Mutex<VecDeque<Arc<dyn MessageWriter>>>,
    drain: Mutex<()>,
    closed: AtomicBool,
    notify: Notify,
}

impl QueuePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued writers.
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolves after the next `publish` (or immediately if one happened
    /// since the last wait) or `close`.
    pub async fn wait_for_message(&self) {
        self.notify.notified().await;
    }

    fn lock_queue(&self) -> MutexGuard<'_, VecDeque<Arc<dyn MessageWriter>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pop(&self) -> Option<Arc<dyn MessageWriter>> {
        self.lock_queue().pop_front()
    }

    fn drain_into(&self, out: &mut WireOut<'_>) -> Result<usize> {
        let mut written = 0;
        loop {
            if written > 0 && out.write_remaining() <= out.capacity() / 4 {
                break;
            }
            let Some(writer) = self.pop() else {
                break;
            };

            let start = out.write_position();
            match writer.write_message(out) {
                Ok(()) => written += 1,
                Err(e) => {
                    out.rollback_to(start)?;
                    if matches!(e, WireError::BufferOverflow { .. }) && start > 0 {
                        // retry once the transport has flushed what is there
                        self.lock_queue().push_front(writer);
                        break;
                    }
                    tracing::error!("Dropping queued message: {}", e);
                }
            }
        }
        Ok(written)
    }
}

impl WireOutPublisher for QueuePublisher {
    fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    fn publish(&self, writer: Arc<dyn MessageWriter>) {
        if self.is_closed() {
            tracing::trace!("Publisher closed, discarding message");
            return;
        }
        self.lock_queue().push_back(writer);
        self.notify.notify_one();
    }

    fn apply_action(&self, out: &mut WireOut<'_>, action: &mut OutputAction<'_>) -> Result<()> {
        let _drain = self.drain.lock().unwrap_or_else(|e| e.into_inner());
        action(out)?;
        if self.is_closed() {
            return Ok(());
        }
        let written = self.drain_into(out)?;
        if written > 0 {
            tracing::trace!(written, "Drained queued messages");
        }
        Ok(())
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = {
            let mut queue = self.lock_queue();
            let n = queue.len();
            queue.clear();
            n
        };
        if dropped > 0 {
            tracing::debug!(dropped, "Publisher closed with queued messages");
        }
        self.notify.notify_one();
    }
}
