//! Handler module - framing engine and message dispatch.
//!
//! Provides:
//! - [`TcpHandler`] - what the transport drives, once per readiness event
//! - [`WireTcpHandler`] - the framing engine, generic over a [`FrameProcessor`]
//! - [`ChannelRouter`] - the standard processor, routing by channel id to
//!   [`SubHandler`]s and bootstrapping the heartbeat
//!
//! # Example
//!
//! ```ignore
//! use framewire::handler::{ChannelRouter, NetworkContext, WireTcpHandler};
//!
//! let mut router = ChannelRouter::connector(context.clone());
//! router.register(7, Box::new(EchoHandler));
//! let handler = WireTcpHandler::new(router, context.publisher.clone(), WireType::Binary);
//! ```

mod channel;
mod wire_tcp;

use std::sync::Arc;

pub use channel::{generate_cid, ChannelRouter, MetaData};
pub use wire_tcp::WireTcpHandler;

use crate::buffer::BufferCursor;
use crate::error::Result;
use crate::heartbeat::TimerService;
use crate::publisher::WireOutPublisher;
use crate::transport::ConnectionCloser;
use crate::wire::{WireIn, WireOut};

/// A connection-level handler driven by the transport.
pub trait TcpHandler: Send {
    /// Write whatever must precede application traffic.
    fn on_initialize(&mut self, _out: &mut BufferCursor) -> Result<()> {
        Ok(())
    }

    /// Consume framed input and produce output. Called once per readiness
    /// event, never concurrently for the same connection.
    fn process(&mut self, input: &mut BufferCursor, output: &mut BufferCursor) -> Result<()>;

    /// Idle tick: contribute queued output if `out` is empty.
    fn send_heartbeat(&mut self, out: &mut BufferCursor) -> Result<()>;

    fn on_end_of_connection(&mut self, heartbeat_timeout: bool);
}

/// Per-frame processor invoked by [`WireTcpHandler`].
///
/// `input` is limited to exactly one frame.
pub trait FrameProcessor: Send {
    fn on_initialize(&mut self, _out: &mut WireOut<'_>) -> Result<()> {
        Ok(())
    }

    fn process(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()>;

    fn on_end_of_connection(&mut self, _heartbeat_timeout: bool) {}
}

/// Handler of one channel of a connection.
pub trait SubHandler: Send {
    fn on_initialize(&mut self, _out: &mut WireOut<'_>) -> Result<()> {
        Ok(())
    }

    /// Handle the data document of a message addressed to this channel.
    fn process_data(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()>;

    fn close(&mut self) {}
}

/// Collaborators shared by the handlers of one connection.
#[derive(Clone)]
pub struct NetworkContext {
    pub publisher: Arc<dyn WireOutPublisher>,
    pub closer: Arc<dyn ConnectionCloser>,
    pub timer: TimerService,
    /// Whether this side accepted the connection.
    pub is_acceptor: bool,
}
