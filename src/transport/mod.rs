//! Transport module - TCP connections.
//!
//! Provides:
//! - [`TcpEventHandler`] - the per-connection event loop
//! - [`CloseSignal`] - one-shot close flag recording a [`CloseReason`]

mod close;
mod tcp;

pub use close::{CloseReason, CloseSignal, ConnectionCloser};
pub use tcp::{ChannelConnection, TcpEventHandler};
