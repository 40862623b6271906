//! Wire format encoding and decoding.
//!
//! Every frame starts with a 4-byte header, little-endian:
//! ```text
//! ┌──────────────┬──────────┬──────────────────────────────┐
//! │ Not complete │ Metadata │ Length                       │
//! │ bit 31       │ bit 30   │ bits 0-29 (max 2^23 - 1)     │
//! └──────────────┴──────────┴──────────────────────────────┘
//! ```
//!
//! A header with bit 31 set reads as a negative `i32` and is rejected as
//! malformed. A metadata header with length 0 is a system no-op frame.

use crate::error::{Result, WireError};

/// Header size in bytes (fixed, exactly 4).
pub const HEADER_SIZE: usize = 4;

/// Largest payload length a frame may carry (8 MiB - 1).
pub const MAX_LENGTH: u32 = (1 << 23) - 1;

/// Flag bits of the header.
pub mod flags {
    /// Frame is still being written; never valid on the wire.
    pub const NOT_COMPLETE: u32 = 0x8000_0000;
    /// Frame carries a metadata document.
    pub const META_DATA: u32 = 0x4000_0000;
    /// Bits holding the payload length.
    pub const LENGTH_MASK: u32 = 0x3FFF_FFFF;
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload length in bytes.
    pub length: u32,
    /// Metadata (true) or data (false) document.
    pub is_metadata: bool,
}

impl Header {
    /// Create a new header.
    pub fn new(length: u32, is_metadata: bool) -> Self {
        Self {
            length,
            is_metadata,
        }
    }

    /// Header for a metadata frame.
    pub fn metadata(length: u32) -> Self {
        Self::new(length, true)
    }

    /// Header for a data frame.
    pub fn data(length: u32) -> Self {
        Self::new(length, false)
    }

    /// A zero-length metadata frame, skipped by the framing loop.
    #[inline]
    pub fn is_system(&self) -> bool {
        self.is_metadata && self.length == 0
    }

    /// Size of the whole frame, header included.
    #[inline]
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }

    /// The raw header word.
    ///
    /// # Example
    ///
    /// ```
    /// use framewire::protocol::Header;
    ///
    /// assert_eq!(Header::metadata(5).to_u32().unwrap(), 0x4000_0005);
    /// assert_eq!(Header::data(5).to_u32().unwrap(), 5);
    /// ```
    pub fn to_u32(&self) -> Result<u32> {
        validate(i64::from(self.length))?;
        let mut word = self.length;
        if self.is_metadata {
            word |= flags::META_DATA;
        }
        Ok(word)
    }

    /// Parse a raw header word.
    pub fn from_u32(word: u32) -> Result<Self> {
        if (word as i32) < 0 {
            return Err(WireError::MalformedHeader { header: word });
        }
        let length = word & flags::LENGTH_MASK;
        validate(i64::from(length))?;
        Ok(Self {
            length,
            is_metadata: word & flags::META_DATA != 0,
        })
    }

    /// Encode header to bytes (little-endian).
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE]> {
        Ok(self.to_u32()?.to_le_bytes())
    }

    /// Decode header from bytes (little-endian).
    pub fn decode(buf: [u8; HEADER_SIZE]) -> Result<Self> {
        Self::from_u32(u32::from_le_bytes(buf))
    }
}

/// Check a payload length against the framing bounds.
pub fn validate(length: i64) -> Result<()> {
    if length < 0 {
        return Err(WireError::NegativeLength(length));
    }
    if length > i64::from(MAX_LENGTH) {
        return Err(WireError::FrameTooLarge {
            length: length as u64,
            max: u64::from(MAX_LENGTH),
        });
    }
    Ok(())
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(length: u32, is_metadata: bool) -> Result<[u8; HEADER_SIZE]> {
    Header::new(length, is_metadata).encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: [u8; HEADER_SIZE]) -> Result<Header> {
    Header::decode(buf)
}

/// What a readable byte range holds at its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCheck {
    /// Fewer than [`HEADER_SIZE`] bytes.
    NeedHeader,
    /// Header parsed, payload not fully arrived yet.
    Incomplete { header: Header, missing: usize },
    /// A whole frame is available.
    Complete(Header),
}

/// Inspect `buf` for a frame without consuming anything.
///
/// Incomplete data is a normal outcome, reported as a value; only a corrupt
/// header is an error.
pub fn check_frame(buf: &[u8]) -> Result<FrameCheck> {
    let Some(word) = buf.get(..HEADER_SIZE) else {
        return Ok(FrameCheck::NeedHeader);
    };
    let header = Header::decode([word[0], word[1], word[2], word[3]])?;
    let size = header.frame_size();
    if buf.len() < size {
        return Ok(FrameCheck::Incomplete {
            header,
            missing: size - buf.len(),
        });
    }
    Ok(FrameCheck::Complete(header))
}
