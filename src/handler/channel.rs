//! Channel routing.
//!
//! Every message is a metadata document naming its channel (`cid`) followed
//! by a data document for that channel. A metadata document that also
//! carries a `handler` record is the heartbeat bootstrap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::{FrameProcessor, NetworkContext, SubHandler};
use crate::config::HeartbeatConfig;
use crate::error::{Result, WireError};
use crate::heartbeat::HeartbeatMonitor;
use crate::wire::{fields, WireIn, WireOut};

/// Metadata document as read off the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaData {
    #[serde(default)]
    pub csp: Option<String>,
    #[serde(default)]
    pub cid: Option<i64>,
    /// Present only on a heartbeat bootstrap.
    #[serde(default)]
    pub handler: Option<HeartbeatConfig>,
}

static CID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// A fresh, positive channel id.
///
/// Mixes wall-clock time, process id and a per-process sequence.
pub fn generate_cid() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let pid = u64::from(std::process::id());
    let seq = CID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let mixed = (nanos ^ seq.rotate_left(32)).wrapping_mul(0x517c_c1b7_2722_0a95) ^ pid;
    // clear the sign bit and never return 0
    ((mixed >> 1) as i64).max(1)
}

/// [`FrameProcessor`] routing data documents to per-channel handlers.
pub struct ChannelRouter {
    context: NetworkContext,
    handlers: HashMap<i64, Box<dyn SubHandler>>,
    current_cid: Option<i64>,
    heartbeat: Option<HeartbeatMonitor>,
    /// Announced by the accepting side in its bootstrap.
    acceptor_heartbeat: Option<HeartbeatConfig>,
}

impl ChannelRouter {
    /// Router for the accepting side; it announces `heartbeat` on initialize.
    pub fn acceptor(context: NetworkContext, heartbeat: HeartbeatConfig) -> Self {
        Self::build(context, Some(heartbeat))
    }

    /// Router for the connecting side; it waits for the peer's bootstrap.
    pub fn connector(context: NetworkContext) -> Self {
        Self::build(context, None)
    }

    fn build(context: NetworkContext, acceptor_heartbeat: Option<HeartbeatConfig>) -> Self {
        Self {
            context,
            handlers: HashMap::new(),
            current_cid: None,
            heartbeat: None,
            acceptor_heartbeat,
        }
    }

    /// Route data documents addressed to `cid` to `handler`.
    ///
    /// Handlers registered before the connection starts are initialized with
    /// it; later ones are not. Returns the handler previously registered.
    pub fn register(&mut self, cid: i64, handler: Box<dyn SubHandler>) -> Option<Box<dyn SubHandler>> {
        self.handlers.insert(cid, handler)
    }

    pub fn context(&self) -> &NetworkContext {
        &self.context
    }

    /// Channel of the last metadata document.
    pub fn current_cid(&self) -> Option<i64> {
        self.current_cid
    }

    /// The connection's heartbeat monitor, once installed.
    pub fn heartbeat(&self) -> Option<&HeartbeatMonitor> {
        self.heartbeat.as_ref()
    }

    fn install_heartbeat(&mut self, monitor: HeartbeatMonitor, out: &mut WireOut<'_>) -> Result<()> {
        monitor.on_initialize(out)?;
        monitor.start();
        tracing::debug!(
            cid = monitor.cid(),
            acceptor = self.context.is_acceptor,
            timeout_ms = monitor.config().heartbeat_timeout_ms,
            interval_ms = monitor.config().heartbeat_interval_ms,
            "Heartbeat installed"
        );
        self.handlers.insert(monitor.cid(), Box::new(monitor.clone()));
        self.heartbeat = Some(monitor);
        Ok(())
    }

    fn on_metadata(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()> {
        let meta: MetaData = input.read_document()?;
        let cid = meta.cid.ok_or(WireError::MissingField(fields::CID))?;
        self.current_cid = Some(cid);

        let Some(config) = meta.handler else {
            return Ok(());
        };
        if self.heartbeat.is_some() {
            tracing::warn!(cid, "Heartbeat already installed, ignoring bootstrap");
            return Ok(());
        }
        tracing::debug!(cid, csp = ?meta.csp, "Received heartbeat bootstrap");
        let monitor = HeartbeatMonitor::from_record(config, cid, &self.context)?;
        self.install_heartbeat(monitor, output)
    }

    fn on_data(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()> {
        let handler = self
            .current_cid
            .and_then(|cid| self.handlers.get_mut(&cid));
        match handler {
            Some(handler) => handler.process_data(input, output),
            None => {
                tracing::warn!(cid = ?self.current_cid, "No handler for channel, dropping document");
                input.skip_document()?;
                Ok(())
            }
        }
    }
}

impl FrameProcessor for ChannelRouter {
    fn on_initialize(&mut self, out: &mut WireOut<'_>) -> Result<()> {
        if let Some(config) = self.acceptor_heartbeat {
            let monitor = HeartbeatMonitor::new(config, generate_cid(), &self.context)?;
            self.install_heartbeat(monitor, out)?;
        }
        for handler in self.handlers.values_mut() {
            handler.on_initialize(out)?;
        }
        Ok(())
    }

    fn process(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()> {
        if let Some(heartbeat) = &self.heartbeat {
            heartbeat.on_message_received();
        }
        let Some(header) = input.peek_header()? else {
            return Ok(());
        };
        if header.is_metadata {
            self.on_metadata(input, output)
        } else {
            self.on_data(input, output)
        }
    }

    fn on_end_of_connection(&mut self, heartbeat_timeout: bool) {
        tracing::debug!(
            channels = self.handlers.len(),
            heartbeat_timeout,
            "Closing channels"
        );
        for (_, mut handler) in self.handlers.drain() {
            handler.close();
        }
        self.heartbeat = None;
        self.current_cid = None;
    }
}
