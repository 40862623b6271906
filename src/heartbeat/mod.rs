//! Heartbeat module - liveness detection for idle connections.
//!
//! The accepting side announces its timing in a bootstrap metadata document;
//! the connecting side builds its monitor from that record. From then on
//! both sides:
//! - send a heartbeat every `heartbeat_interval` when nothing else is queued
//! - close the connection after `heartbeat_timeout` without inbound traffic
//!
//! Any inbound frame counts as traffic, not only heartbeats.

mod message;
mod monitor;
mod timer;

pub use message::{Beat, Bootstrap, ChannelHeader, HeartbeatMessage, ROOT_CSP};
pub use monitor::{HeartbeatMonitor, Liveness, MonitorState};
pub use timer::{TimerHandle, TimerService};
