//! The framing engine.
//!
//! Splits the input stream into frames and hands them to a
//! [`FrameProcessor`] one at a time, each with the readable range narrowed
//! to exactly that frame. Flow control is cooperative: the loop stops as soon
//! as a frame produced output, or when the output is down to its last
//! quarter, so the transport can flush before more input is consumed.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::{FrameProcessor, TcpHandler};
use crate::buffer::BufferCursor;
use crate::error::{Result, WireError};
use crate::protocol::{Header, HEADER_SIZE};
use crate::publisher::WireOutPublisher;
use crate::wire::{Wire, WireIn, WireOut, WireType};

/// [`TcpHandler`] that frames input for a [`FrameProcessor`].
pub struct WireTcpHandler<P> {
    processor: P,
    publisher: Arc<dyn WireOutPublisher>,
    in_wire: Wire,
    out_wire: Wire,
}

impl<P: FrameProcessor> WireTcpHandler<P> {
    pub fn new(processor: P, publisher: Arc<dyn WireOutPublisher>, wire_type: WireType) -> Self {
        Self {
            processor,
            publisher,
            in_wire: Wire::new(wire_type),
            out_wire: Wire::new(wire_type),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Rebind the codec instances if the transport handed us other buffers.
    fn check_wires(&mut self, input: &BufferCursor, output: &BufferCursor) {
        if self.in_wire.bind(input.id()) {
            tracing::trace!(buffer = ?input.id(), "Input wire bound");
        }
        if self.out_wire.bind(output.id()) {
            tracing::trace!(buffer = ?output.id(), "Output wire bound");
        }
    }

    /// Run the processor on the frame at the read position. Returns whether
    /// it produced output.
    fn dispatch(
        &mut self,
        input: &mut BufferCursor,
        output: &mut BufferCursor,
        header: Header,
    ) -> Result<bool> {
        let end = input.read_position() + header.frame_size();
        let limit = input.read_limit();
        let out_start = output.write_position();
        input.set_read_limit(end)?;

        let wire_type = self.in_wire.wire_type();
        let processor = &mut self.processor;
        let out_wire = &mut self.out_wire;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let mut wire_in = WireIn::new(&mut *input, wire_type);
            let mut wire_out = WireOut::new(&mut *output, out_wire);
            processor.process(&mut wire_in, &mut wire_out)
        }));

        // Whatever the processor did to the cursor, resume after this frame.
        input.set_read_limit(input.write_position())?;
        input.set_read_position(end)?;
        input.set_read_limit(limit)?;

        let failure = match outcome {
            Ok(Ok(())) => return Ok(output.write_position() > out_start),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => format!("panicked: {}", panic_message(&*panic)),
        };
        tracing::error!(
            length = header.length,
            metadata = header.is_metadata,
            "Frame processor failed, frame dropped: {}",
            failure
        );
        if output.write_position() > out_start {
            output.set_write_position(out_start)?;
        }
        Ok(false)
    }

    /// Let the publisher write queued messages into `output`.
    fn contribute(&mut self, output: &mut BufferCursor) -> Result<()> {
        let mut wire_out = WireOut::new(output, &mut self.out_wire);
        self.publisher.apply_action(&mut wire_out, &mut |_| Ok(()))
    }
}

impl<P: FrameProcessor> TcpHandler for WireTcpHandler<P> {
    fn on_initialize(&mut self, out: &mut BufferCursor) -> Result<()> {
        if self.out_wire.bind(out.id()) {
            tracing::trace!(buffer = ?out.id(), "Output wire bound");
        }
        let mut wire_out = WireOut::new(out, &mut self.out_wire);
        self.processor.on_initialize(&mut wire_out)
    }

    fn process(&mut self, input: &mut BufferCursor, output: &mut BufferCursor) -> Result<()> {
        self.check_wires(input, output);

        let mut advanced = false;
        while let Some(word) = input.peek_u32_le() {
            let header = Header::from_u32(word)?;

            if header.is_system() {
                input.read_skip(HEADER_SIZE)?;
                continue;
            }

            let frame_size = header.frame_size();
            if frame_size > input.capacity() {
                return Err(WireError::FrameTooLarge {
                    length: u64::from(header.length),
                    max: input.capacity().saturating_sub(HEADER_SIZE) as u64,
                });
            }
            if input.read_remaining() < frame_size {
                tracing::trace!(
                    needed = frame_size,
                    available = input.read_remaining(),
                    "Partial frame, waiting for more input"
                );
                break;
            }

            let produced = self.dispatch(input, output, header)?;
            advanced = true;
            if produced {
                break;
            }
            if input.read_remaining() <= HEADER_SIZE
                || output.write_remaining() <= output.capacity() / 4
            {
                break;
            }
        }

        if !advanced && output.write_position() == 0 {
            self.contribute(output)?;
        }
        Ok(())
    }

    fn send_heartbeat(&mut self, out: &mut BufferCursor) -> Result<()> {
        if out.write_position() != 0 {
            return Ok(());
        }
        if self.out_wire.bind(out.id()) {
            tracing::trace!(buffer = ?out.id(), "Output wire bound");
        }
        self.contribute(out)
    }

    fn on_end_of_connection(&mut self, heartbeat_timeout: bool) {
        tracing::debug!(heartbeat_timeout, "End of connection");
        self.processor.on_end_of_connection(heartbeat_timeout);
        self.publisher.close();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, MAX_LENGTH};
    use crate::publisher::{MessageWriter, QueuePublisher};
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Reply {
        n: u32,
    }

    #[derive(Default, Clone, Copy)]
    enum Behaviour {
        #[default]
        Silent,
        Reply,
        FailAfterWriting,
        Panic,
    }

    /// Records every frame it is handed.
    #[derive(Default)]
    struct Recorder {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
        behaviour: Behaviour,
        ended: Option<bool>,
    }

    impl FrameProcessor for Recorder {
        fn process(&mut self, input: &mut WireIn<'_>, output: &mut WireOut<'_>) -> Result<()> {
            let frame = input.bytes().readable().to_vec();
            let n = {
                let mut frames = self.frames.lock().unwrap();
                frames.push(frame);
                frames.len() as u32
            };
            match self.behaviour {
                Behaviour::Silent => Ok(()),
                Behaviour::Reply => {
                    output.write_document(false, &Reply { n })?;
                    Ok(())
                }
                Behaviour::FailAfterWriting => {
                    output.write_document(false, &Reply { n })?;
                    Err(WireError::Processor("rejected".into()))
                }
                Behaviour::Panic => panic!("processor blew up"),
            }
        }

        fn on_end_of_connection(&mut self, heartbeat_timeout: bool) {
            self.ended = Some(heartbeat_timeout);
        }
    }

    fn handler(behaviour: Behaviour) -> (WireTcpHandler<Recorder>, Arc<QueuePublisher>) {
        let publisher = Arc::new(QueuePublisher::new());
        let recorder = Recorder {
            behaviour,
            ..Recorder::default()
        };
        (
            WireTcpHandler::new(recorder, publisher.clone(), WireType::Binary),
            publisher,
        )
    }

    fn frames(payloads: &[&[u8]]) -> Vec<u8> {
        payloads
            .iter()
            .flat_map(|p| build_frame(false, p).unwrap())
            .collect()
    }

    fn seen(handler: &WireTcpHandler<Recorder>) -> Vec<Vec<u8>> {
        handler.processor().frames.lock().unwrap().clone()
    }

    #[test]
    fn test_frames_dispatched_in_order() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let bytes = frames(&[b"one", b"two", b"three"]);
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(256);

        handler.process(&mut input, &mut output).unwrap();

        let seen = seen(&handler);
        assert_eq!(seen.len(), 3);
        assert_eq!(&seen[0][HEADER_SIZE..], b"one");
        assert_eq!(&seen[1][HEADER_SIZE..], b"two");
        assert_eq!(&seen[2][HEADER_SIZE..], b"three");
        assert_eq!(input.read_position(), bytes.len());
        assert_eq!(input.read_limit(), bytes.len());
        assert_eq!(output.write_position(), 0);
    }

    #[test]
    fn test_partial_frame_leaves_cursor_untouched() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let full = frames(&[b"hello world"]);
        let mut input = BufferCursor::with_capacity(64);
        input.write_slice(&full[..full.len() - 3]).unwrap();
        let mut output = BufferCursor::with_capacity(64);

        for _ in 0..2 {
            handler.process(&mut input, &mut output).unwrap();
            assert!(seen(&handler).is_empty());
            assert_eq!(input.read_position(), 0);
            assert_eq!(input.read_limit(), full.len() - 3);
            assert_eq!(output.write_position(), 0);
        }

        input.write_slice(&full[full.len() - 3..]).unwrap();
        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(seen(&handler).len(), 1);
        assert_eq!(input.read_position(), full.len());
    }

    #[test]
    fn test_fewer_than_header_bytes_is_a_noop() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut input = BufferCursor::from_slice(&[5, 0, 0]);
        let mut output = BufferCursor::with_capacity(64);
        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(input.read_position(), 0);
        assert!(seen(&handler).is_empty());
    }

    #[test]
    fn test_system_frame_skipped() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut bytes = build_frame(true, b"").unwrap();
        assert_eq!(bytes, [0x00, 0x00, 0x00, 0x40]);
        bytes.extend(frames(&[b"data"]));
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(64);

        handler.process(&mut input, &mut output).unwrap();

        let seen = seen(&handler);
        assert_eq!(seen.len(), 1);
        assert_eq!(&seen[0][HEADER_SIZE..], b"data");
        assert_eq!(input.read_position(), bytes.len());
    }

    #[test]
    fn test_frame_larger_than_buffer_is_fatal() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut input = BufferCursor::with_capacity(64);
        input.write_slice(&100u32.to_le_bytes()).unwrap();
        let mut output = BufferCursor::with_capacity(64);

        let err = handler.process(&mut input, &mut output).unwrap_err();
        assert!(matches!(err, WireError::FrameTooLarge { length: 100, .. }));
        assert!(err.is_fatal());
        assert!(seen(&handler).is_empty());
    }

    #[test]
    fn test_length_over_ceiling_is_fatal_in_large_buffer() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut input = BufferCursor::with_capacity(MAX_LENGTH as usize + 64);
        input.write_slice(&(MAX_LENGTH + 1).to_le_bytes()).unwrap();
        input.write_slice(&[b'x'; 32]).unwrap();
        let mut output = BufferCursor::with_capacity(64);

        let err = handler.process(&mut input, &mut output).unwrap_err();
        assert!(matches!(
            err,
            WireError::FrameTooLarge { length, max } if length == (MAX_LENGTH + 1) as u64 && max == MAX_LENGTH as u64
        ));
        assert!(seen(&handler).is_empty());
        assert_eq!(input.read_position(), 0);
    }

    #[test]
    fn test_malformed_header_is_fatal() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut input = BufferCursor::from_slice(&[0, 0, 0, 0x80, 1, 2, 3, 4]);
        let mut output = BufferCursor::with_capacity(64);

        let err = handler.process(&mut input, &mut output).unwrap_err();
        assert!(matches!(err, WireError::MalformedHeader { .. }));
        assert!(seen(&handler).is_empty());
    }

    #[test]
    fn test_stops_after_frame_with_output() {
        let (mut handler, _) = handler(Behaviour::Reply);
        let bytes = frames(&[b"a", b"b"]);
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(256);

        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(seen(&handler).len(), 1);
        assert_eq!(input.read_position(), HEADER_SIZE + 1);
        assert!(output.write_position() > 0);

        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(seen(&handler).len(), 2);
        assert_eq!(input.read_position(), bytes.len());

        let mut replies = WireIn::new(&mut output, WireType::Binary);
        assert_eq!(replies.read_document::<Reply>().unwrap(), Reply { n: 1 });
        assert_eq!(replies.read_document::<Reply>().unwrap(), Reply { n: 2 });
    }

    #[test]
    fn test_stops_when_output_headroom_low() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let bytes = frames(&[b"a", b"b"]);
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(16);
        output.write_slice(&[0; 12]).unwrap();

        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(seen(&handler).len(), 1);
    }

    #[test]
    fn test_processor_error_still_advances_and_rolls_back() {
        let (mut handler, _) = handler(Behaviour::FailAfterWriting);
        let bytes = frames(&[b"a", b"b"]);
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(256);

        handler.process(&mut input, &mut output).unwrap();

        assert_eq!(seen(&handler).len(), 2);
        assert_eq!(input.read_position(), bytes.len());
        assert_eq!(output.write_position(), 0);
    }

    #[test]
    fn test_processor_panic_is_contained() {
        let (mut handler, _) = handler(Behaviour::Panic);
        let bytes = frames(&[b"a", b"b"]);
        let mut input = BufferCursor::from_slice(&bytes);
        let mut output = BufferCursor::with_capacity(256);

        handler.process(&mut input, &mut output).unwrap();

        assert_eq!(seen(&handler).len(), 2);
        assert_eq!(input.read_position(), bytes.len());
        assert_eq!(input.read_limit(), bytes.len());
    }

    fn queued(n: u32) -> Arc<dyn MessageWriter> {
        Arc::new(move |out: &mut WireOut<'_>| -> Result<()> {
            out.write_document(false, &Reply { n })?;
            Ok(())
        })
    }

    #[test]
    fn test_idle_process_drains_publisher() {
        let (mut handler, publisher) = handler(Behaviour::Silent);
        publisher.publish(queued(9));
        let mut input = BufferCursor::with_capacity(64);
        let mut output = BufferCursor::with_capacity(64);

        handler.process(&mut input, &mut output).unwrap();

        assert!(publisher.is_empty());
        let mut out = WireIn::new(&mut output, WireType::Binary);
        assert_eq!(out.read_document::<Reply>().unwrap(), Reply { n: 9 });
    }

    #[test]
    fn test_publisher_not_consulted_after_input_frames() {
        let (mut handler, publisher) = handler(Behaviour::Silent);
        publisher.publish(queued(9));
        let mut input = BufferCursor::from_slice(&frames(&[b"a"]));
        let mut output = BufferCursor::with_capacity(64);

        handler.process(&mut input, &mut output).unwrap();
        assert_eq!(publisher.len(), 1);
        assert_eq!(output.write_position(), 0);

        handler.send_heartbeat(&mut output).unwrap();
        assert!(publisher.is_empty());
        assert!(output.write_position() > 0);
    }

    #[test]
    fn test_send_heartbeat_skips_when_output_pending() {
        let (mut handler, publisher) = handler(Behaviour::Silent);
        publisher.publish(queued(1));
        let mut output = BufferCursor::with_capacity(64);
        output.write_slice(&[1, 2, 3]).unwrap();

        handler.send_heartbeat(&mut output).unwrap();
        assert_eq!(publisher.len(), 1);
        assert_eq!(output.write_position(), 3);
    }

    #[test]
    fn test_rebinds_when_buffers_change() {
        let (mut handler, _) = handler(Behaviour::Silent);
        let mut first = BufferCursor::with_capacity(16);
        let mut second = BufferCursor::with_capacity(16);
        let mut output = BufferCursor::with_capacity(16);

        handler.process(&mut first, &mut output).unwrap();
        assert_eq!(handler.in_wire.bound_to(), Some(first.id()));
        handler.process(&mut second, &mut output).unwrap();
        assert_eq!(handler.in_wire.bound_to(), Some(second.id()));
        assert_eq!(handler.out_wire.bound_to(), Some(output.id()));
    }

    #[test]
    fn test_end_of_connection_closes_publisher() {
        let (mut handler, publisher) = handler(Behaviour::Silent);
        publisher.publish(queued(1));
        handler.on_end_of_connection(true);
        assert!(publisher.is_closed());
        assert!(publisher.is_empty());
        assert_eq!(handler.processor().ended, Some(true));
    }
}
