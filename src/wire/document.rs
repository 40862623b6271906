//! Document readers and writers over buffer cursors.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::WireType;
use crate::buffer::{BufferCursor, BufferId};
use crate::error::{Result, WireError};
use crate::protocol::{check_frame, write_frame, FrameCheck, Header, HEADER_SIZE};

/// A codec instance bound to one buffer.
///
/// Holds the scratch space documents are encoded into. The framing engine
/// keeps one per direction and rebinds it when the transport swaps buffers.
#[derive(Debug)]
pub struct Wire {
    wire_type: WireType,
    bound: Option<BufferId>,
    scratch: Vec<u8>,
}

impl Wire {
    pub fn new(wire_type: WireType) -> Self {
        Self {
            wire_type,
            bound: None,
            scratch: Vec::new(),
        }
    }

    #[inline]
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Buffer this instance currently serves.
    #[inline]
    pub fn bound_to(&self) -> Option<BufferId> {
        self.bound
    }

    /// Bind to `id`. Returns `true` if this was a rebind.
    pub fn bind(&mut self, id: BufferId) -> bool {
        if self.bound == Some(id) {
            return false;
        }
        self.bound = Some(id);
        self.scratch = Vec::new();
        true
    }
}

/// Reader of documents from an input cursor.
pub struct WireIn<'a> {
    bytes: &'a mut BufferCursor,
    wire_type: WireType,
}

impl<'a> WireIn<'a> {
    pub fn new(bytes: &'a mut BufferCursor, wire_type: WireType) -> Self {
        Self { bytes, wire_type }
    }

    /// The underlying cursor.
    pub fn bytes(&mut self) -> &mut BufferCursor {
        &mut *self.bytes
    }

    #[inline]
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Header of the next document, if one is fully readable.
    pub fn peek_header(&self) -> Result<Option<Header>> {
        match check_frame(self.bytes.readable())? {
            FrameCheck::Complete(header) => Ok(Some(header)),
            FrameCheck::NeedHeader | FrameCheck::Incomplete { .. } => Ok(None),
        }
    }

    /// Read and decode the next document.
    pub fn read_document<T: DeserializeOwned>(&mut self) -> Result<T> {
        let header = self.next_header()?;
        let payload = self.bytes.read_slice(header.frame_size())?;
        self.wire_type.decode(&payload[HEADER_SIZE..])
    }

    /// Consume the next document without decoding it.
    pub fn skip_document(&mut self) -> Result<Header> {
        let header = self.next_header()?;
        self.bytes.read_skip(header.frame_size())?;
        Ok(header)
    }

    fn next_header(&self) -> Result<Header> {
        self.peek_header()?.ok_or_else(|| {
            WireError::Processor(format!(
                "no complete document in {} readable bytes",
                self.bytes.read_remaining()
            ))
        })
    }
}

/// Writer of documents into an output cursor.
pub struct WireOut<'a> {
    bytes: &'a mut BufferCursor,
    wire: &'a mut Wire,
}

impl<'a> WireOut<'a> {
    pub fn new(bytes: &'a mut BufferCursor, wire: &'a mut Wire) -> Self {
        Self { bytes, wire }
    }

    /// The underlying cursor.
    pub fn bytes(&mut self) -> &mut BufferCursor {
        &mut *self.bytes
    }

    #[inline]
    pub fn write_position(&self) -> usize {
        self.bytes.write_position()
    }

    #[inline]
    pub fn write_remaining(&self) -> usize {
        self.bytes.write_remaining()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.capacity()
    }

    #[inline]
    pub fn wire_type(&self) -> WireType {
        self.wire.wire_type
    }

    /// Encode `value` and append it as one frame. Returns the frame size.
    ///
    /// Nothing is written if encoding fails or the frame does not fit.
    pub fn write_document<T: Serialize + ?Sized>(
        &mut self,
        is_metadata: bool,
        value: &T,
    ) -> Result<usize> {
        let wire_type = self.wire.wire_type;
        wire_type.encode_into(&mut self.wire.scratch, value)?;
        write_frame(&mut *self.bytes, is_metadata, &self.wire.scratch)
    }

    /// Drop everything written after `position`.
    pub fn rollback_to(&mut self, position: usize) -> Result<()> {
        self.bytes.set_write_position(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Meta {
        cid: i64,
    }

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Payload {
        text: String,
    }

    #[test]
    fn test_bind_reports_rebinds() {
        let a = BufferCursor::with_capacity(8);
        let b = BufferCursor::with_capacity(8);
        let mut wire = Wire::new(WireType::Binary);

        assert!(wire.bind(a.id()));
        assert!(!wire.bind(a.id()));
        assert!(wire.bind(b.id()));
        assert_eq!(wire.bound_to(), Some(b.id()));
    }

    #[test]
    fn test_write_then_read_two_documents() {
        for wire_type in [WireType::Binary, WireType::Json] {
            let mut cursor = BufferCursor::with_capacity(256);
            let mut wire = Wire::new(wire_type);
            {
                let mut out = WireOut::new(&mut cursor, &mut wire);
                out.write_document(true, &Meta { cid: 3 }).unwrap();
                out.write_document(
                    false,
                    &Payload {
                        text: "hi".to_string(),
                    },
                )
                .unwrap();
            }

            let mut input = WireIn::new(&mut cursor, wire_type);
            assert!(input.peek_header().unwrap().unwrap().is_metadata);
            let meta: Meta = input.read_document().unwrap();
            assert_eq!(meta, Meta { cid: 3 });

            assert!(!input.peek_header().unwrap().unwrap().is_metadata);
            let payload: Payload = input.read_document().unwrap();
            assert_eq!(payload.text, "hi");
            assert!(input.peek_header().unwrap().is_none());
        }
    }

    #[test]
    fn test_write_document_overflow_leaves_cursor_untouched() {
        let mut cursor = BufferCursor::with_capacity(8);
        let mut wire = Wire::new(WireType::Binary);
        let mut out = WireOut::new(&mut cursor, &mut wire);
        let result = out.write_document(
            false,
            &Payload {
                text: "far too long for eight bytes".to_string(),
            },
        );
        assert!(matches!(result, Err(WireError::BufferOverflow { .. })));
        assert_eq!(out.write_position(), 0);
    }

    #[test]
    fn test_read_without_document_fails() {
        let mut cursor = BufferCursor::from_slice(&[5, 0, 0, 0, 1]);
        let mut input = WireIn::new(&mut cursor, WireType::Binary);
        assert!(input.peek_header().unwrap().is_none());
        assert!(input.skip_document().is_err());
        assert_eq!(input.bytes().read_position(), 0);
    }

    #[test]
    fn test_skip_document() {
        let mut cursor = BufferCursor::with_capacity(64);
        let mut wire = Wire::new(WireType::Binary);
        WireOut::new(&mut cursor, &mut wire)
            .write_document(true, &Meta { cid: 1 })
            .unwrap();
        let end = cursor.write_position();

        let mut input = WireIn::new(&mut cursor, WireType::Binary);
        let header = input.skip_document().unwrap();
        assert!(header.is_metadata);
        assert_eq!(input.bytes().read_position(), end);
    }
}
