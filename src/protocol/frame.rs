//! Frame building helpers.

use super::wire_format::{Header, HEADER_SIZE};
use crate::buffer::BufferCursor;
use crate::error::{Result, WireError};

/// Build a complete frame (header + payload) as a Vec.
///
/// # Example
///
/// ```
/// use framewire::protocol::{build_frame, HEADER_SIZE};
///
/// let frame = build_frame(false, b"hello").unwrap();
/// assert_eq!(frame.len(), HEADER_SIZE + 5);
/// ```
pub fn build_frame(is_metadata: bool, payload: &[u8]) -> Result<Vec<u8>> {
    let header = Header::new(payload_length(payload)?, is_metadata);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode()?);
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Append a frame to `out`.
///
/// Either the whole frame is written or nothing is.
pub fn write_frame(out: &mut BufferCursor, is_metadata: bool, payload: &[u8]) -> Result<usize> {
    let header = Header::new(payload_length(payload)?, is_metadata);
    let size = header.frame_size();
    if out.write_remaining() < size {
        return Err(WireError::BufferOverflow {
            needed: size,
            available: out.write_remaining(),
        });
    }
    out.write_slice(&header.encode()?)?;
    out.write_slice(payload)?;
    Ok(size)
}

fn payload_length(payload: &[u8]) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| WireError::FrameTooLarge {
        length: payload.len() as u64,
        max: u64::from(super::MAX_LENGTH),
    })
}
