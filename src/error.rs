//! Error types for framewire.

use thiserror::Error;

/// Main error type for all framewire operations.
#[derive(Debug, Error)]
pub enum WireError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (text wire and config).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error (binary wire).
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error (binary wire).
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Header is negative when read as a signed 32-bit value (incomplete or corrupt).
    #[error("Malformed header: 0x{header:08x}")]
    MalformedHeader { header: u32 },

    /// A frame length that is negative.
    #[error("Negative frame length: {0}")]
    NegativeLength(i64),

    /// Frame length exceeds the framing ceiling or the buffer that must hold it.
    #[error("Frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: u64, max: u64 },

    /// Attempt to move a buffer cursor outside its bounds.
    #[error("Buffer cursor misuse: {0}")]
    BufferCursorMisuse(String),

    /// Not enough room left in the output buffer.
    #[error("Buffer overflow: need {needed} bytes, {available} available")]
    BufferOverflow { needed: usize, available: usize },

    /// The per-frame processor failed.
    #[error("Processor failure: {0}")]
    Processor(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A required document field was absent.
    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

impl WireError {
    /// Whether this error means the inbound stream is corrupt and the
    /// connection has to be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            WireError::MalformedHeader { .. }
                | WireError::NegativeLength(_)
                | WireError::FrameTooLarge { .. }
                | WireError::BufferCursorMisuse(_)
        )
    }
}

/// Result type alias using WireError.
pub type Result<T> = std::result::Result<T, WireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_errors_are_fatal() {
        assert!(WireError::MalformedHeader { header: 0x8000_0000 }.is_fatal());
        assert!(WireError::NegativeLength(-1).is_fatal());
        assert!(WireError::FrameTooLarge { length: 1 << 24, max: 1 << 23 }.is_fatal());
        assert!(WireError::BufferCursorMisuse("x".into()).is_fatal());
    }

    #[test]
    fn test_processor_errors_are_not_fatal() {
        assert!(!WireError::Processor("boom".into()).is_fatal());
        assert!(!WireError::MissingField("cid").is_fatal());
        assert!(!WireError::BufferOverflow { needed: 8, available: 4 }.is_fatal());
        assert!(!WireError::Config("bad timeout".into()).is_fatal());
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer gone");
        assert!(!WireError::from(io).is_fatal());
    }

    #[test]
    fn test_display() {
        let err = WireError::MalformedHeader { header: 0x8000_0010 };
        assert_eq!(err.to_string(), "Malformed header: 0x80000010");
    }
}
