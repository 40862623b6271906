//! Configuration types.
//!
//! [`HeartbeatConfig`] doubles as the record carried in the heartbeat
//! bootstrap document, so its serialized form is part of the wire format:
//! exactly `heartbeatTimeoutMs` then `heartbeatIntervalMs`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WireError};
use crate::protocol::{HEADER_SIZE, MAX_LENGTH};
use crate::wire::WireType;

/// Smallest accepted heartbeat timeout.
pub const MIN_HEARTBEAT_TIMEOUT_MS: u64 = 1000;

/// Smallest accepted heartbeat interval.
pub const MIN_HEARTBEAT_INTERVAL_MS: u64 = 500;

/// Default heartbeat timeout.
pub const DEFAULT_HEARTBEAT_TIMEOUT_MS: u64 = 5000;

/// Default heartbeat interval.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;

/// Default capacity of each per-connection buffer (1 MiB).
pub const DEFAULT_BUFFER_CAPACITY: usize = 1 << 20;

/// Heartbeat timing for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    /// Silence after which the connection is closed.
    pub heartbeat_timeout_ms: u64,
    /// Period of outgoing heartbeats.
    pub heartbeat_interval_ms: u64,
}

impl HeartbeatConfig {
    /// Build a fully validated configuration.
    ///
    /// Requires `timeout >= 1000ms`, `interval >= 500ms` and
    /// `timeout > interval`.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use framewire::config::HeartbeatConfig;
    ///
    /// let config = HeartbeatConfig::new(Duration::from_secs(5), Duration::from_secs(1)).unwrap();
    /// assert_eq!(config.heartbeat_timeout_ms, 5000);
    ///
    /// assert!(HeartbeatConfig::new(Duration::from_millis(400), Duration::from_millis(500)).is_err());
    /// ```
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self> {
        let config = Self {
            heartbeat_timeout_ms: duration_ms(timeout),
            heartbeat_interval_ms: duration_ms(interval),
        };
        config.validate()?;
        Ok(config)
    }

    /// Lower bounds only. This is what a monitor checks when it is built from
    /// a record received off the wire.
    pub fn check_bounds(&self) -> Result<()> {
        if self.heartbeat_timeout_ms < MIN_HEARTBEAT_TIMEOUT_MS {
            return Err(WireError::Config(format!(
                "heartbeatTimeoutMs={} is too small, minimum is {}",
                self.heartbeat_timeout_ms, MIN_HEARTBEAT_TIMEOUT_MS
            )));
        }
        if self.heartbeat_interval_ms < MIN_HEARTBEAT_INTERVAL_MS {
            return Err(WireError::Config(format!(
                "heartbeatIntervalMs={} is too small, minimum is {}",
                self.heartbeat_interval_ms, MIN_HEARTBEAT_INTERVAL_MS
            )));
        }
        Ok(())
    }

    /// Lower bounds plus `timeout > interval`.
    pub fn validate(&self) -> Result<()> {
        self.check_bounds()?;
        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(WireError::Config(format!(
                "heartbeatTimeoutMs={} must exceed heartbeatIntervalMs={}",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    #[inline]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Per-connection settings for the TCP transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TcpConfig {
    /// Capacity of the input and of the output buffer.
    pub buffer_capacity: usize,
    /// Document encoding on the wire.
    pub wire_type: WireType,
    /// Heartbeat timing announced by the accepting side.
    pub heartbeat: HeartbeatConfig,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            wire_type: WireType::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl TcpConfig {
    /// Parse a JSON configuration; absent fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    pub fn with_wire_type(mut self, wire_type: WireType) -> Self {
        self.wire_type = wire_type;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Check the settings are usable.
    pub fn validate(&self) -> Result<()> {
        // Room for at least a bootstrap document and a couple of heartbeats.
        if self.buffer_capacity < 256 {
            return Err(WireError::Config(format!(
                "bufferCapacity={} is too small, minimum is 256",
                self.buffer_capacity
            )));
        }
        let largest_frame = HEADER_SIZE + MAX_LENGTH as usize;
        if self.buffer_capacity > 2 * largest_frame {
            return Err(WireError::Config(format!(
                "bufferCapacity={} exceeds {}",
                self.buffer_capacity,
                2 * largest_frame
            )));
        }
        self.heartbeat.validate()
    }
}
