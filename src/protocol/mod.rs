//! Protocol module - header codec and frame helpers.
//!
//! This module implements the framing layer of the stream:
//! - 4-byte header encoding/decoding with metadata flag
//! - Length bounds validation
//! - Non-consuming frame inspection for partial reads

mod frame;
mod wire_format;

pub use frame::{build_frame, write_frame};
pub use wire_format::{
    check_frame, decode_header, encode_header, flags, validate, FrameCheck, Header, HEADER_SIZE,
    MAX_LENGTH,
};
