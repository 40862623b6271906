//! # framewire
//!
//! Framing and heartbeat core of a low-latency TCP messaging library.
//!
//! ## Architecture
//!
//! - **Framing**: each frame is a 4-byte little-endian header (metadata flag
//!   and length) followed by one encoded document
//! - **Dispatch**: [`handler::WireTcpHandler`] hands complete frames, one at a
//!   time, to a [`handler::FrameProcessor`]
//! - **Liveness**: [`heartbeat::HeartbeatMonitor`] sends heartbeats on idle
//!   connections and closes those that go silent
//!
//! ## Example
//!
//! ```ignore
//! use framewire::config::TcpConfig;
//! use framewire::heartbeat::TimerService;
//! use framewire::transport::TcpEventHandler;
//!
//! #[tokio::main]
//! async fn main() -> framewire::Result<()> {
//!     let timer = TimerService::dedicated("heartbeat")?;
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:7000").await?;
//!     loop {
//!         let (stream, _) = listener.accept().await?;
//!         let connection = TcpEventHandler::acceptor(stream, &TcpConfig::default(), timer.clone())?;
//!         tokio::spawn(connection.run());
//!     }
//! }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod handler;
pub mod heartbeat;
pub mod protocol;
pub mod publisher;
pub mod transport;
pub mod wire;

pub use error::{Result, WireError};
