//! Buffer cursor over a fixed-capacity byte region.
//!
//! A [`BufferCursor`] keeps four offsets into its storage:
//!
//! ```text
//! 0 <= read_position <= read_limit <= write_position <= capacity
//! ```
//!
//! `read_limit` normally follows `write_position`; the framing loop lowers it
//! temporarily so a processor can only see the frame it was handed. Every
//! setter is checked and reports [`WireError::BufferCursorMisuse`] instead of
//! clamping.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;

use crate::error::{Result, WireError};

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a buffer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        Self(NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Mutable cursor over a byte region owned by the transport.
pub struct BufferCursor {
    id: BufferId,
    data: BytesMut,
    read_position: usize,
    read_limit: usize,
    write_position: usize,
}

impl BufferCursor {
    /// Create an empty cursor with a fixed capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            id: BufferId::next(),
            data: BytesMut::zeroed(capacity),
            read_position: 0,
            read_limit: 0,
            write_position: 0,
        }
    }

    /// Create a cursor whose readable content is `bytes` and whose capacity
    /// is exactly `bytes.len()`.
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut cursor = Self::with_capacity(bytes.len());
        cursor.data.copy_from_slice(bytes);
        cursor.write_position = bytes.len();
        cursor.read_limit = bytes.len();
        cursor
    }

    /// Identity of this buffer instance.
    #[inline]
    pub fn id(&self) -> BufferId {
        self.id
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn read_position(&self) -> usize {
        self.read_position
    }

    #[inline]
    pub fn read_limit(&self) -> usize {
        self.read_limit
    }

    #[inline]
    pub fn write_position(&self) -> usize {
        self.write_position
    }

    /// Bytes between read position and read limit.
    #[inline]
    pub fn read_remaining(&self) -> usize {
        self.read_limit - self.read_position
    }

    /// Free bytes between write position and capacity.
    #[inline]
    pub fn write_remaining(&self) -> usize {
        self.capacity() - self.write_position
    }

    /// Readable bytes (`read_position..read_limit`).
    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.data[self.read_position..self.read_limit]
    }

    /// Free space after the write position, for filling from a socket.
    /// Commit what was filled with [`advance_write`](Self::advance_write).
    #[inline]
    pub fn writable(&mut self) -> &mut [u8] {
        let start = self.write_position;
        &mut self.data[start..]
    }

    /// Peek the little-endian u32 at the read position without consuming it.
    pub fn peek_u32_le(&self) -> Option<u32> {
        let bytes = self.readable().get(..4)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Move the read position anywhere in `0..=read_limit`.
    pub fn set_read_position(&mut self, position: usize) -> Result<()> {
        if position > self.read_limit {
            return Err(self.misuse(format!(
                "read position {} beyond read limit {}",
                position, self.read_limit
            )));
        }
        self.read_position = position;
        Ok(())
    }

    /// Move the read limit anywhere in `read_position..=write_position`.
    pub fn set_read_limit(&mut self, limit: usize) -> Result<()> {
        if limit < self.read_position || limit > self.write_position {
            return Err(self.misuse(format!(
                "read limit {} outside {}..={}",
                limit, self.read_position, self.write_position
            )));
        }
        self.read_limit = limit;
        Ok(())
    }

    /// Consume `n` readable bytes.
    pub fn read_skip(&mut self, n: usize) -> Result<()> {
        let position = self
            .read_position
            .checked_add(n)
            .ok_or_else(|| self.misuse(format!("skip of {} overflows", n)))?;
        self.set_read_position(position)
    }

    /// Consume and return the next `n` readable bytes.
    pub fn read_slice(&mut self, n: usize) -> Result<&[u8]> {
        let start = self.read_position;
        self.read_skip(n)?;
        Ok(&self.data[start..start + n])
    }

    /// Append `src` at the write position.
    ///
    /// Fails with [`WireError::BufferOverflow`] and writes nothing if `src`
    /// does not fit.
    pub fn write_slice(&mut self, src: &[u8]) -> Result<()> {
        if src.len() > self.write_remaining() {
            return Err(WireError::BufferOverflow {
                needed: src.len(),
                available: self.write_remaining(),
            });
        }
        let start = self.write_position;
        self.data[start..start + src.len()].copy_from_slice(src);
        self.commit_write(start + src.len());
        Ok(())
    }

    /// Overwrite 4 already-written bytes at `position`.
    pub fn write_u32_le_at(&mut self, position: usize, value: u32) -> Result<()> {
        match position.checked_add(4) {
            Some(end) if end <= self.write_position => {
                self.data[position..end].copy_from_slice(&value.to_le_bytes());
                Ok(())
            }
            _ => Err(self.misuse(format!(
                "u32 at {} outside written range 0..{}",
                position, self.write_position
            ))),
        }
    }

    /// Commit `n` bytes filled through [`writable`](Self::writable).
    pub fn advance_write(&mut self, n: usize) -> Result<()> {
        if n > self.write_remaining() {
            return Err(self.misuse(format!(
                "advance of {} past capacity {}",
                n,
                self.capacity()
            )));
        }
        self.commit_write(self.write_position + n);
        Ok(())
    }

    /// Move the write position, e.g. to roll back a partial write.
    ///
    /// The new position must lie in `read_position..=capacity`; a read limit
    /// past it is pulled back with it.
    pub fn set_write_position(&mut self, position: usize) -> Result<()> {
        if position < self.read_position || position > self.capacity() {
            return Err(self.misuse(format!(
                "write position {} outside {}..={}",
                position,
                self.read_position,
                self.capacity()
            )));
        }
        if self.read_limit == self.write_position || self.read_limit > position {
            self.read_limit = position;
        }
        self.write_position = position;
        Ok(())
    }

    /// Reset every offset to 0.
    pub fn clear(&mut self) {
        self.read_position = 0;
        self.read_limit = 0;
        self.write_position = 0;
    }

    /// Move unread bytes to the start of the buffer.
    pub fn compact(&mut self) {
        if self.read_position == 0 {
            return;
        }
        let unread = self.write_position - self.read_position;
        self.data
            .copy_within(self.read_position..self.write_position, 0);
        self.read_limit -= self.read_position;
        self.read_position = 0;
        self.write_position = unread;
    }

    fn commit_write(&mut self, end: usize) {
        if self.read_limit == self.write_position {
            self.read_limit = end;
        }
        self.write_position = end;
    }

    fn misuse(&self, message: String) -> WireError {
        WireError::BufferCursorMisuse(format!("{} (buffer {:?})", message, self.id))
    }
}

impl std::fmt::Debug for BufferCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferCursor")
            .field("id", &self.id)
            .field("read_position", &self.read_position)
            .field("read_limit", &self.read_limit)
            .field("write_position", &self.write_position)
            .field("capacity", &self.capacity())
            .finish()
    }
}
