//! Wire module - typed documents carried in frames.
//!
//! A logical message is two documents in two consecutive frames:
//! - a metadata document (header flag set) naming the channel via `cid`
//! - a data document (flag clear) with the payload
//!
//! Documents are serde structs encoded according to the connection's
//! [`WireType`].
//!
//! # Example
//!
//! ```
//! use framewire::buffer::BufferCursor;
//! use framewire::wire::{Wire, WireIn, WireOut, WireType};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Meta { cid: i64 }
//!
//! let mut cursor = BufferCursor::with_capacity(64);
//! let mut wire = Wire::new(WireType::Binary);
//! WireOut::new(&mut cursor, &mut wire).write_document(true, &Meta { cid: 9 }).unwrap();
//!
//! let meta: Meta = WireIn::new(&mut cursor, WireType::Binary).read_document().unwrap();
//! assert_eq!(meta.cid, 9);
//! ```

mod codec;
mod document;

pub use codec::WireType;
pub use document::{Wire, WireIn, WireOut};

/// Reserved field names.
pub mod fields {
    /// Channel id, required in every metadata document.
    pub const CID: &str = "cid";
}
