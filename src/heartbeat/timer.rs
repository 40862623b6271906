//! Shared timer service for heartbeat tasks.
//!
//! Tasks run on a tokio runtime. [`TimerService::dedicated`] owns a
//! single-threaded runtime on a named thread so that checks and sends of all
//! connections sharing it run in a deterministic order, away from I/O.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use framewire::heartbeat::TimerService;
//!
//! let timer = TimerService::dedicated("heartbeat")?;
//! let mut remaining = 3;
//! let _handle = timer.schedule_with_reschedule(Duration::from_secs(1), move || {
//!     remaining -= 1;
//!     (remaining > 0).then_some(Duration::from_secs(1))
//! });
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

use crate::error::{Result, WireError};

/// Handle to submit timed tasks to.
#[derive(Clone)]
pub struct TimerService {
    handle: Handle,
    _runtime: Option<Arc<DedicatedRuntime>>,
}

/// Keeps the dedicated thread alive until the last service clone is dropped.
struct DedicatedRuntime {
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
}

impl Drop for DedicatedRuntime {
    fn drop(&mut self) {
        let sender = self.shutdown.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }
}

impl TimerService {
    /// Run tasks on an existing runtime.
    pub fn from_handle(handle: Handle) -> Self {
        Self {
            handle,
            _runtime: None,
        }
    }

    /// Run tasks on the runtime of the caller.
    pub fn current() -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| WireError::Config(format!("no tokio runtime for timers: {}", e)))?;
        Ok(Self::from_handle(handle))
    }

    /// Start a single-threaded runtime on a thread called `name`.
    pub fn dedicated(name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_time().build()?;
        let handle = runtime.handle().clone();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })?;
        tracing::debug!(thread = name, "Timer service started");

        Ok(Self {
            handle,
            _runtime: Some(Arc::new(DedicatedRuntime {
                shutdown: Mutex::new(Some(shutdown_tx)),
            })),
        })
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let join = self.handle.spawn(async move {
            sleep(delay).await;
            task();
        });
        TimerHandle { join }
    }

    /// Run `task` after `delay`; it is run again after whatever delay it
    /// returns, until it returns `None`.
    pub fn schedule_with_reschedule<F>(&self, delay: Duration, mut task: F) -> TimerHandle
    where
        F: FnMut() -> Option<Duration> + Send + 'static,
    {
        let join = self.handle.spawn(async move {
            let mut next = Some(delay);
            while let Some(delay) = next {
                sleep(delay).await;
                next = task();
            }
        });
        TimerHandle { join }
    }

    /// Run `task` every `period`, first after `initial_delay`. Late ticks are
    /// caught up so the long-run rate stays fixed.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let join = self.handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + initial_delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                ticks.tick().await;
                task();
            }
        });
        TimerHandle { join }
    }
}

/// Cancellable handle of a scheduled task.
#[derive(Debug)]
pub struct TimerHandle {
    join: JoinHandle<()>,
}

impl TimerHandle {
    /// Stop the task; a run already in progress completes.
    pub fn cancel(&self) {
        self.join.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
