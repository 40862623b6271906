//! Per-connection event loop.
//!
//! Owns the stream and both buffers, and drives a [`TcpHandler`]:
//!
//! ```text
//! on_initialize ─► flush ─┐
//!                         ▼
//!        ┌──► process ─► send_heartbeat ─► flush ─► compact
//!        │                                              │
//!        └── read │ queued message │ close signal ◄─────┘
//! ```

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use super::close::{CloseReason, CloseSignal, ConnectionCloser};
use crate::buffer::BufferCursor;
use crate::config::TcpConfig;
use crate::error::{Result, WireError};
use crate::handler::{ChannelRouter, NetworkContext, TcpHandler, WireTcpHandler};
use crate::heartbeat::TimerService;
use crate::protocol::HEADER_SIZE;
use crate::publisher::QueuePublisher;

/// The standard connection: framing engine over a channel router.
pub type ChannelConnection<S = TcpStream> = TcpEventHandler<WireTcpHandler<ChannelRouter>, S>;

/// Event loop of one connection.
pub struct TcpEventHandler<H, S = TcpStream> {
    stream: S,
    handler: H,
    input: BufferCursor,
    output: BufferCursor,
    publisher: Arc<QueuePublisher>,
    closer: Arc<CloseSignal>,
}

impl<S> TcpEventHandler<WireTcpHandler<ChannelRouter>, S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Accepting side: announces `config.heartbeat` to the peer.
    pub fn acceptor(stream: S, config: &TcpConfig, timer: TimerService) -> Result<Self> {
        Self::channel(stream, config, timer, true)
    }

    /// Connecting side: adopts the heartbeat the peer announces.
    pub fn connector(stream: S, config: &TcpConfig, timer: TimerService) -> Result<Self> {
        Self::channel(stream, config, timer, false)
    }

    fn channel(stream: S, config: &TcpConfig, timer: TimerService, is_acceptor: bool) -> Result<Self> {
        config.validate()?;
        let publisher = Arc::new(QueuePublisher::new());
        let closer = Arc::new(CloseSignal::new());
        let context = NetworkContext {
            publisher: publisher.clone(),
            closer: closer.clone(),
            timer,
            is_acceptor,
        };
        let router = if is_acceptor {
            ChannelRouter::acceptor(context.clone(), config.heartbeat)
        } else {
            ChannelRouter::connector(context.clone())
        };
        let handler = WireTcpHandler::new(router, context.publisher, config.wire_type);
        Ok(Self::new(
            stream,
            handler,
            publisher,
            closer,
            config.buffer_capacity,
        ))
    }

    /// The router, to register channels before [`run`](Self::run).
    pub fn router_mut(&mut self) -> &mut ChannelRouter {
        self.handler.processor_mut()
    }
}

impl TcpEventHandler<WireTcpHandler<ChannelRouter>, TcpStream> {
    /// Connect to `addr` as the connecting side.
    pub async fn connect<A: ToSocketAddrs>(addr: A, config: &TcpConfig, timer: TimerService) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(peer = ?stream.peer_addr().ok(), "Connected");
        Self::connector(stream, config, timer)
    }
}

impl<H, S> TcpEventHandler<H, S>
where
    H: TcpHandler,
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(
        stream: S,
        handler: H,
        publisher: Arc<QueuePublisher>,
        closer: Arc<CloseSignal>,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            stream,
            handler,
            input: BufferCursor::with_capacity(buffer_capacity),
            output: BufferCursor::with_capacity(buffer_capacity),
            publisher,
            closer,
        }
    }

    /// Outbound queue; messages published here are written by the loop.
    pub fn publisher(&self) -> Arc<QueuePublisher> {
        self.publisher.clone()
    }

    /// Close signal; closing it ends [`run`](Self::run).
    pub fn closer(&self) -> Arc<CloseSignal> {
        self.closer.clone()
    }

    /// Serve the connection until it closes.
    ///
    /// Returns why it closed. A corrupt inbound stream or an I/O failure is
    /// returned as the error, after the connection was torn down.
    pub async fn run(mut self) -> Result<CloseReason> {
        let outcome = self.serve().await;
        let reason = match &outcome {
            Ok(reason) => *reason,
            Err(e) if e.is_fatal() => {
                tracing::error!("Corrupted stream, closing connection: {}", e);
                CloseReason::Corrupted
            }
            Err(WireError::Io(e)) => {
                tracing::warn!("Connection I/O failed: {}", e);
                CloseReason::PeerClosed
            }
            Err(e) => {
                tracing::error!("Connection failed: {}", e);
                CloseReason::Corrupted
            }
        };

        self.closer.close_connection(reason);
        let reason = self.closer.reason().unwrap_or(reason);
        self.handler
            .on_end_of_connection(reason == CloseReason::HeartbeatTimeout);
        if let Err(e) = self.stream.shutdown().await {
            tracing::trace!("Shutdown after close: {}", e);
        }
        tracing::debug!(%reason, "Connection closed");
        outcome
    }

    async fn serve(&mut self) -> Result<CloseReason> {
        self.handler.on_initialize(&mut self.output)?;
        if let Some(reason) = self.flush().await? {
            return Ok(reason);
        }
        let closer = self.closer.clone();
        let publisher = self.publisher.clone();

        loop {
            if let Some(reason) = closer.reason() {
                return Ok(reason);
            }
            if let Some(reason) = self.pump().await? {
                return Ok(reason);
            }

            self.input.compact();
            if self.input.write_remaining() == 0 {
                return Err(WireError::FrameTooLarge {
                    length: self.input.read_remaining() as u64,
                    max: self.input.capacity().saturating_sub(HEADER_SIZE) as u64,
                });
            }

            tokio::select! {
                reason = closer.closed() => return Ok(reason),
                read = self.stream.read(self.input.writable()) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(CloseReason::PeerClosed);
                    }
                    self.input.advance_write(n)?;
                    tracing::trace!(bytes = n, "Read");
                }
                _ = publisher.wait_for_message() => {}
            }
        }
    }

    /// Process buffered input and write out the results, for as long as
    /// frames keep being consumed. Returns the close reason if the
    /// connection closed while output was pending.
    async fn pump(&mut self) -> Result<Option<CloseReason>> {
        loop {
            let before = self.input.read_position();
            self.handler.process(&mut self.input, &mut self.output)?;
            if self.output.write_position() == 0 {
                self.handler.send_heartbeat(&mut self.output)?;
            }
            if let Some(reason) = self.flush().await? {
                return Ok(Some(reason));
            }

            let progressed = self.input.read_position() != before;
            if !progressed || self.input.read_remaining() < HEADER_SIZE {
                return Ok(None);
            }
        }
    }

    /// Write out pending output. A peer that stops reading blocks the
    /// write, so it is raced against the close signal.
    async fn flush(&mut self) -> Result<Option<CloseReason>> {
        let pending = self.output.read_remaining();
        if pending > 0 {
            let closer = self.closer.clone();
            let write = async {
                self.stream.write_all(self.output.readable()).await?;
                self.stream.flush().await
            };
            tokio::select! {
                reason = closer.closed() => {
                    tracing::debug!(bytes = pending, %reason, "Closed with output pending");
                    return Ok(Some(reason));
                }
                written = write => written?,
            }
            tracing::trace!(bytes = pending, "Flushed");
        }
        self.output.clear();
        Ok(None)
    }
}
