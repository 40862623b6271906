//! Heartbeat documents.

use serde::{Deserialize, Serialize};

use crate::config::HeartbeatConfig;
use crate::error::Result;
use crate::publisher::MessageWriter;
use crate::wire::WireOut;

/// Channel path announced by the bootstrap document.
pub const ROOT_CSP: &str = "/";

/// Metadata document announcing the heartbeat channel to the connecting side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bootstrap {
    pub csp: String,
    pub cid: i64,
    pub handler: HeartbeatConfig,
}

/// Metadata document addressing a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelHeader {
    pub cid: i64,
}

/// Data document of a heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    #[serde(default)]
    pub heartbeat: String,
}

/// Writes one steady-state heartbeat: `{cid}` then `{heartbeat: ""}`.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatMessage {
    cid: i64,
}

impl HeartbeatMessage {
    pub fn new(cid: i64) -> Self {
        Self { cid }
    }
}

impl MessageWriter for HeartbeatMessage {
    fn write_message(&self, out: &mut WireOut<'_>) -> Result<()> {
        out.write_document(true, &ChannelHeader { cid: self.cid })?;
        out.write_document(false, &Beat::default())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferCursor;
    use crate::wire::{Wire, WireIn, WireType};

    #[test]
    fn test_heartbeat_message_is_two_documents() {
        let mut cursor = BufferCursor::with_capacity(128);
        let mut wire = Wire::new(WireType::Binary);
        HeartbeatMessage::new(42)
            .write_message(&mut WireOut::new(&mut cursor, &mut wire))
            .unwrap();

        let mut input = WireIn::new(&mut cursor, WireType::Binary);
        assert!(input.peek_header().unwrap().unwrap().is_metadata);
        let header: ChannelHeader = input.read_document().unwrap();
        assert_eq!(header.cid, 42);

        assert!(!input.peek_header().unwrap().unwrap().is_metadata);
        let beat: Beat = input.read_document().unwrap();
        assert_eq!(beat.heartbeat, "");
    }

    #[test]
    fn test_bootstrap_json_layout() {
        let bootstrap = Bootstrap {
            csp: ROOT_CSP.to_string(),
            cid: 7,
            handler: HeartbeatConfig::default(),
        };
        assert_eq!(
            serde_json::to_string(&bootstrap).unwrap(),
            r#"{"csp":"/","cid":7,"handler":{"heartbeatTimeoutMs":5000,"heartbeatIntervalMs":1000}}"#
        );
    }

    #[test]
    fn test_channel_header_uses_reserved_cid_field() {
        let value = serde_json::to_value(ChannelHeader { cid: 42 }).unwrap();
        assert_eq!(value[crate::wire::fields::CID], 42);
        assert_eq!(value.as_object().unwrap().len(), 1);
    }
}
