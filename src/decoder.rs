//! Incremental frame decoder
//!
//! [`FrameDecoder`] is a state machine over a [`ByteCursor`]. Each state
//! needs a fixed number of bytes; when they are not buffered yet the decoder
//! returns `Ok(None)` without consuming anything or touching its own fields,
//! and resumes from the same state once more data has been appended. The
//! result is therefore independent of how the transport split the stream.
//!
//! ```text
//! AwaitingHeader -> [AwaitingExtLen16 | AwaitingExtLen64] -> AwaitingMaskKey
//!     -> AwaitingPayload -> AwaitingHeader
//! ```
//!
//! Any violation moves the decoder to `Failed`, which is terminal.

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use crate::cursor::ByteCursor;
use crate::error::{CloseReason, Error, Result};
use crate::frame::{Frame, FrameHeader, OpCode, parse_close_payload};
use crate::mask::apply_mask;
use crate::message::Message;
use crate::utf8::{valid_utf8_prefix_len, validate_utf8};
use crate::SMALL_MESSAGE_THRESHOLD;

/// Decoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    /// Waiting for the 2 base header bytes
    AwaitingHeader,
    /// Waiting for the 16-bit extended length
    AwaitingExtLen16,
    /// Waiting for the 64-bit extended length
    AwaitingExtLen64,
    /// Waiting for the 4-byte masking key
    AwaitingMaskKey,
    /// Waiting for the whole payload
    AwaitingPayload,
    /// A protocol violation was detected; nothing more is decoded
    Failed,
}

/// Item produced by [`FrameDecoder::decode`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete data message
    Message(Message),
    /// Ping with its payload
    Ping(Bytes),
    /// Pong with its payload
    Pong(Bytes),
    /// Close with its optional status
    Close(Option<CloseReason>),
}

/// Header fields collected while the frame is still incomplete
#[derive(Debug, Clone, Copy)]
struct Partial {
    fin: bool,
    opcode: OpCode,
    raw_len: u8,
    payload_len: u64,
    mask: [u8; 4],
}

impl Partial {
    const EMPTY: Partial = Partial {
        fin: false,
        opcode: OpCode::Continuation,
        raw_len: 0,
        payload_len: 0,
        mask: [0; 4],
    };
}

/// Stateful decoder for client-to-server frames
pub struct FrameDecoder {
    state: DecodeState,
    partial: Partial,
    /// Opcode of the fragmented message being reassembled
    fragment_opcode: Option<OpCode>,
    /// Payload accumulated so far for the fragmented message
    fragment_buf: BytesMut,
    /// Leading bytes of `fragment_buf` already known to be complete UTF-8
    utf8_checked: usize,
    max_frame_size: usize,
    max_message_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the given frame and message size limits
    pub fn new(max_frame_size: usize, max_message_size: usize) -> Self {
        Self {
            state: DecodeState::AwaitingHeader,
            partial: Partial::EMPTY,
            fragment_opcode: None,
            fragment_buf: BytesMut::new(),
            utf8_checked: 0,
            max_frame_size,
            max_message_size,
        }
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Check if the decoder hit a protocol violation
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.state == DecodeState::Failed
    }

    /// Check if a fragmented message is being reassembled
    #[inline]
    pub fn in_fragmented_message(&self) -> bool {
        self.fragment_opcode.is_some()
    }

    /// Bytes accumulated for the fragmented message in progress
    #[inline]
    pub fn fragment_len(&self) -> usize {
        self.fragment_buf.len()
    }

    /// Enter the terminal state and hand the error back
    fn fail(&mut self, err: Error) -> Error {
        warn!(error = %err, state = ?self.state, "frame decoding failed");
        self.state = DecodeState::Failed;
        self.release();
        err
    }

    /// Drop the fragmented message in progress and its buffer
    pub fn release(&mut self) {
        self.fragment_opcode = None;
        self.fragment_buf = BytesMut::new();
        self.utf8_checked = 0;
    }

    /// Decode the next raw frame
    ///
    /// Returns:
    /// - Ok(Some(frame)) once a complete frame was consumed
    /// - Ok(None) if more data is needed; nothing was consumed for the
    ///   current state
    /// - Err(e) on a protocol violation; the decoder is now failed
    pub fn next_frame(&mut self, cursor: &mut ByteCursor) -> Result<Option<Frame>> {
        loop {
            match self.state {
                DecodeState::Failed => return Err(Error::DecoderFailed),

                DecodeState::AwaitingHeader => {
                    let (Some(b0), Some(b1)) = (cursor.peek_u8(0), cursor.peek_u8(1)) else {
                        return Ok(None);
                    };
                    let partial = self.parse_base_header(b0, b1)?;
                    cursor.try_consume(2);

                    self.partial = partial;
                    self.state = match partial.raw_len {
                        126 => DecodeState::AwaitingExtLen16,
                        127 => DecodeState::AwaitingExtLen64,
                        _ => DecodeState::AwaitingMaskKey,
                    };
                }

                DecodeState::AwaitingExtLen16 => {
                    let Some(len) = cursor.peek_u16_be(0) else {
                        return Ok(None);
                    };
                    cursor.try_consume(2);
                    self.partial.payload_len = len as u64;
                    self.state = DecodeState::AwaitingMaskKey;
                }

                DecodeState::AwaitingExtLen64 => {
                    let Some(len) = cursor.peek_u64_be(0) else {
                        return Ok(None);
                    };
                    if len >> 63 != 0 {
                        return Err(self.fail(Error::Protocol("payload length MSB must be 0")));
                    }
                    cursor.try_consume(8);
                    self.partial.payload_len = len;
                    self.state = DecodeState::AwaitingMaskKey;
                }

                DecodeState::AwaitingMaskKey => {
                    let Some(key) = cursor.try_consume(4) else {
                        return Ok(None);
                    };
                    self.partial.mask.copy_from_slice(&key);
                    self.state = DecodeState::AwaitingPayload;
                }

                DecodeState::AwaitingPayload => {
                    self.check_payload_size()?;

                    let payload_len = self.partial.payload_len as usize;
                    let Some(raw) = cursor.try_consume(payload_len) else {
                        return Ok(None);
                    };

                    let mut payload = raw
                        .try_into_mut()
                        .unwrap_or_else(|shared| BytesMut::from(&shared[..]));
                    apply_mask(&mut payload, self.partial.mask);

                    let p = self.partial;
                    let frame = Frame {
                        header: FrameHeader {
                            fin: p.fin,
                            rsv1: false,
                            rsv2: false,
                            rsv3: false,
                            opcode: p.opcode,
                            masked: true,
                            raw_len: p.raw_len,
                            payload_len: p.payload_len,
                            mask: Some(p.mask),
                        },
                        payload: payload.freeze(),
                    };
                    trace!(
                        opcode = ?frame.header.opcode,
                        fin = frame.header.fin,
                        len = frame.payload.len(),
                        "frame decoded"
                    );

                    self.partial = Partial::EMPTY;
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(frame));
                }
            }
        }
    }

    /// Validate the two base header bytes
    fn parse_base_header(&mut self, b0: u8, b1: u8) -> Result<Partial> {
        let fin = b0 & 0x80 != 0;

        // RSV bits must be 0, no extension is ever negotiated
        if b0 & 0x70 != 0 {
            return Err(self.fail(Error::Protocol("RSV bits must be 0")));
        }

        let Some(opcode) = OpCode::from_u8(b0 & 0x0F) else {
            return Err(self.fail(Error::Protocol("reserved opcode")));
        };

        if b1 & 0x80 == 0 {
            return Err(self.fail(Error::Protocol("client frames must be masked")));
        }
        let raw_len = b1 & 0x7F;

        if opcode.is_control() {
            if !fin {
                return Err(self.fail(Error::Protocol("control frame must not be fragmented")));
            }
            if raw_len as usize > SMALL_MESSAGE_THRESHOLD {
                return Err(self.fail(Error::Protocol("control frame too large")));
            }
        }

        Ok(Partial {
            fin,
            opcode,
            raw_len,
            payload_len: raw_len as u64,
            mask: [0; 4],
        })
    }

    /// Enforce the frame and message limits before reading the payload
    fn check_payload_size(&mut self) -> Result<()> {
        let len = self.partial.payload_len;
        if len > self.max_frame_size as u64 {
            return Err(self.fail(Error::FrameTooLarge));
        }

        let accumulated = match self.partial.opcode {
            OpCode::Continuation => self.fragment_buf.len() as u64,
            OpCode::Text | OpCode::Binary => 0,
            _ => return Ok(()),
        };
        if accumulated + len > self.max_message_size as u64 {
            return Err(self.fail(Error::MessageTooLarge));
        }
        Ok(())
    }

    /// Decode the next message or control frame
    ///
    /// Fragments are reassembled internally; control frames arriving between
    /// fragments are returned without disturbing the message in progress.
    pub fn decode(&mut self, cursor: &mut ByteCursor) -> Result<Option<Decoded>> {
        while let Some(frame) = self.next_frame(cursor)? {
            if let Some(decoded) = self.dispatch(frame)? {
                return Ok(Some(decoded));
            }
        }
        Ok(None)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<Option<Decoded>> {
        let Frame { header, payload } = frame;
        match header.opcode {
            OpCode::Text | OpCode::Binary => {
                if self.fragment_opcode.is_some() {
                    return Err(self.fail(Error::Protocol("expected continuation frame")));
                }
                if header.fin {
                    return self.complete(header.opcode, payload, 0).map(Some);
                }
                self.start_fragment(header.opcode, &payload)?;
                Ok(None)
            }
            OpCode::Continuation => {
                let Some(opcode) = self.fragment_opcode else {
                    return Err(self.fail(Error::Protocol("unexpected continuation frame")));
                };
                self.fragment_buf.extend_from_slice(&payload);

                if header.fin {
                    self.fragment_opcode = None;
                    let checked = std::mem::take(&mut self.utf8_checked);
                    let data = self.fragment_buf.split().freeze();
                    return self.complete(opcode, data, checked).map(Some);
                }
                if opcode == OpCode::Text {
                    self.check_text_prefix()?;
                }
                Ok(None)
            }
            OpCode::Close => match parse_close_payload(&payload) {
                Ok(reason) => Ok(Some(Decoded::Close(reason))),
                Err(e) => Err(self.fail(e)),
            },
            OpCode::Ping => Ok(Some(Decoded::Ping(payload))),
            OpCode::Pong => Ok(Some(Decoded::Pong(payload))),
        }
    }

    fn start_fragment(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        self.fragment_opcode = Some(opcode);
        self.fragment_buf.clear();
        self.fragment_buf.extend_from_slice(payload);
        self.utf8_checked = 0;

        if opcode == OpCode::Text {
            self.check_text_prefix()?;
        }
        Ok(())
    }

    /// Validate the fragment bytes not checked yet
    ///
    /// Only the tail after the last complete character is looked at, so
    /// reassembly stays linear in the message size.
    fn check_text_prefix(&mut self) -> Result<()> {
        match valid_utf8_prefix_len(&self.fragment_buf[self.utf8_checked..]) {
            Some(len) => {
                self.utf8_checked += len;
                Ok(())
            }
            None => Err(self.fail(Error::InvalidUtf8)),
        }
    }

    /// Build the message; `checked` leading bytes of text are already valid
    fn complete(&mut self, opcode: OpCode, data: Bytes, checked: usize) -> Result<Decoded> {
        match opcode {
            OpCode::Text => {
                if !validate_utf8(&data[checked..]) {
                    return Err(self.fail(Error::InvalidUtf8));
                }
                Ok(Decoded::Message(Message::Text(data)))
            }
            _ => Ok(Decoded::Message(Message::Binary(data))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_frame;

    const MASK: [u8; 4] = [0x37, 0xfa, 0x21, 0x3d];

    fn client_frame(opcode: OpCode, payload: &[u8], fin: bool) -> Bytes {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, opcode, payload, fin, Some(MASK));
        buf.freeze()
    }

    fn decoder() -> FrameDecoder {
        FrameDecoder::new(16 * 1024 * 1024, 64 * 1024 * 1024)
    }

    fn decode_all(decoder: &mut FrameDecoder, cursor: &mut ByteCursor) -> Result<Vec<Decoded>> {
        let mut out = Vec::new();
        while let Some(item) = decoder.decode(cursor)? {
            out.push(item);
        }
        Ok(out)
    }

    fn decode_chunks(chunks: &[&[u8]]) -> Result<Vec<Decoded>> {
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();
        let mut out = Vec::new();
        for chunk in chunks {
            cursor.append(Bytes::copy_from_slice(chunk));
            out.extend(decode_all(&mut decoder, &mut cursor)?);
        }
        Ok(out)
    }

    fn close_code_of(result: Result<Vec<Decoded>>) -> Option<u16> {
        result.err().and_then(|e| e.close_code())
    }

    #[test]
    fn test_payload_lengths() {
        for len in [0usize, 1, 125, 126, 65535, 65536] {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let wire = client_frame(OpCode::Binary, &payload, true);

            let decoded = decode_chunks(&[&wire[..]]).unwrap();
            assert_eq!(
                decoded,
                vec![Decoded::Message(Message::Binary(Bytes::from(payload)))],
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_chunk_boundary_invariance() {
        let frames = [
            client_frame(OpCode::Text, b"", true),
            client_frame(OpCode::Text, b"hello", true),
            client_frame(OpCode::Binary, &[0xAB; 125], true),
            client_frame(OpCode::Binary, &[0xCD; 126], true),
            client_frame(OpCode::Binary, &[0xEF; 300], true),
            client_frame(OpCode::Ping, b"abc", true),
        ];

        for wire in &frames {
            let whole = decode_chunks(&[&wire[..]]).unwrap();
            assert_eq!(whole.len(), 1);
            for split in 0..=wire.len() {
                let (a, b) = wire.split_at(split);
                let parts = decode_chunks(&[a, b]).unwrap();
                assert_eq!(parts, whole, "split at {} of {}", split, wire.len());
            }
        }
    }

    #[test]
    fn test_chunk_boundary_invariance_64bit_length() {
        let payload: Vec<u8> = (0..70_000).map(|i| (i % 253) as u8).collect();
        let wire = client_frame(OpCode::Binary, &payload, true);
        let whole = decode_chunks(&[&wire[..]]).unwrap();

        // Every offset through the header and into the payload, then a stride
        let offsets = (0..=32).chain((33..wire.len()).step_by(4099)).chain([wire.len()]);
        for split in offsets {
            let (a, b) = wire.split_at(split);
            assert_eq!(decode_chunks(&[a, b]).unwrap(), whole, "split at {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&client_frame(OpCode::Text, b"Hel", false));
        wire.extend_from_slice(&client_frame(OpCode::Ping, b"p", true));
        wire.extend_from_slice(&client_frame(OpCode::Continuation, b"lo", true));
        wire.extend_from_slice(&client_frame(OpCode::Binary, &[7; 200], true));

        let chunks: Vec<&[u8]> = wire.chunks(1).collect();
        let decoded = decode_chunks(&chunks).unwrap();
        assert_eq!(
            decoded,
            vec![
                Decoded::Ping(Bytes::from_static(b"p")),
                Decoded::Message(Message::text("Hello")),
                Decoded::Message(Message::Binary(Bytes::from(vec![7u8; 200]))),
            ]
        );
    }

    #[test]
    fn test_many_frames_in_one_chunk() {
        let mut wire = BytesMut::new();
        for i in 0..10u8 {
            wire.extend_from_slice(&client_frame(OpCode::Binary, &[i], true));
        }
        let decoded = decode_chunks(&[&wire[..]]).unwrap();
        assert_eq!(decoded.len(), 10);
        assert_eq!(
            decoded[9],
            Decoded::Message(Message::Binary(Bytes::from_static(&[9])))
        );
    }

    #[test]
    fn test_fragmented_text() {
        let first = client_frame(OpCode::Text, b"Hel", false);
        let last = client_frame(OpCode::Continuation, b"lo", true);
        let decoded = decode_chunks(&[&first[..], &last[..]]).unwrap();
        assert_eq!(decoded, vec![Decoded::Message(Message::text("Hello"))]);
    }

    #[test]
    fn test_control_interleaved_with_fragments() {
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();

        cursor.append(client_frame(OpCode::Binary, b"ab", false));
        assert_eq!(decoder.decode(&mut cursor).unwrap(), None);
        assert!(decoder.in_fragmented_message());
        assert_eq!(decoder.fragment_len(), 2);

        cursor.append(client_frame(OpCode::Pong, b"x", true));
        assert_eq!(
            decoder.decode(&mut cursor).unwrap(),
            Some(Decoded::Pong(Bytes::from_static(b"x")))
        );
        assert_eq!(decoder.fragment_len(), 2);

        cursor.append(client_frame(OpCode::Continuation, b"cd", false));
        cursor.append(client_frame(OpCode::Continuation, b"ef", true));
        assert_eq!(
            decoder.decode(&mut cursor).unwrap(),
            Some(Decoded::Message(Message::Binary(Bytes::from_static(b"abcdef"))))
        );
        assert!(!decoder.in_fragmented_message());
    }

    #[test]
    fn test_suspends_without_consuming() {
        let wire = client_frame(OpCode::Binary, &[1u8; 300], true);
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();

        cursor.append(wire.slice(..1));
        assert!(decoder.next_frame(&mut cursor).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert_eq!(cursor.available_bytes(), 1);

        cursor.append(wire.slice(1..3));
        assert!(decoder.next_frame(&mut cursor).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingExtLen16);
        assert_eq!(cursor.available_bytes(), 1);

        cursor.append(wire.slice(3..7));
        assert!(decoder.next_frame(&mut cursor).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingMaskKey);
        assert_eq!(cursor.available_bytes(), 3);

        cursor.append(wire.slice(7..20));
        assert!(decoder.next_frame(&mut cursor).unwrap().is_none());
        assert_eq!(decoder.state(), DecodeState::AwaitingPayload);
        assert_eq!(cursor.available_bytes(), 12);

        cursor.append(wire.slice(20..));
        let frame = decoder.next_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame.payload.as_ref(), &[1u8; 300][..]);
        assert_eq!(frame.header.mask, Some(MASK));
        assert_eq!(frame.header.header_size(), 8);
        assert_eq!(decoder.state(), DecodeState::AwaitingHeader);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_rsv_bits_rejected() {
        for bit in [0x40u8, 0x20, 0x10] {
            let mut wire = client_frame(OpCode::Text, b"x", true).to_vec();
            wire[0] |= bit;
            assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002), "bit {:#x}", bit);
        }
    }

    #[test]
    fn test_reserved_opcode_rejected() {
        let wire = [0x83u8, 0x80, 0, 0, 0, 0];
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_unmasked_frame_rejected() {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Text, b"hello", true, None);
        assert_eq!(close_code_of(decode_chunks(&[&buf[..]])), Some(1002));
    }

    #[test]
    fn test_fragmented_control_rejected() {
        let wire = client_frame(OpCode::Ping, b"", false);
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_oversized_control_rejected() {
        // Ping declaring a 16-bit length; only the header is needed to fail
        let wire = [0x89u8, 0x80 | 126, 0x00, 0x7e];
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_64bit_length_msb_rejected() {
        let mut wire = vec![0x82u8, 0x80 | 127];
        wire.extend_from_slice(&(1u64 << 63).to_be_bytes());
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_unexpected_continuation_rejected() {
        let wire = client_frame(OpCode::Continuation, b"lo", true);
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_interrupted_fragmented_message_rejected() {
        let first = client_frame(OpCode::Text, b"Hel", false);
        let second = client_frame(OpCode::Text, b"lo", true);
        assert_eq!(close_code_of(decode_chunks(&[&first[..], &second[..]])), Some(1002));
    }

    #[test]
    fn test_frame_too_large() {
        let mut decoder = FrameDecoder::new(100, 1000);
        let mut cursor = ByteCursor::new();
        // Header and mask only; the limit trips before the payload arrives
        let wire = client_frame(OpCode::Binary, &[0u8; 101], true);
        cursor.append(wire.slice(..8));
        let err = decoder.decode(&mut cursor).unwrap_err();
        assert_eq!(err.close_code(), Some(1009));
        assert!(decoder.is_failed());
    }

    #[test]
    fn test_accumulated_message_too_large() {
        let mut decoder = FrameDecoder::new(100, 150);
        let mut cursor = ByteCursor::new();
        cursor.append(client_frame(OpCode::Binary, &[0u8; 100], false));
        assert_eq!(decoder.decode(&mut cursor).unwrap(), None);

        cursor.append(client_frame(OpCode::Continuation, &[0u8; 51], true));
        let err = decoder.decode(&mut cursor).unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge));
        assert_eq!(err.close_code(), Some(1009));
    }

    #[test]
    fn test_invalid_utf8_text() {
        let wire = client_frame(OpCode::Text, &[0x68, 0xff, 0x69], true);
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1007));
    }

    #[test]
    fn test_text_split_inside_character() {
        let snowman = "☃".as_bytes();
        let first = client_frame(OpCode::Text, &snowman[..1], false);
        let last = client_frame(OpCode::Continuation, &snowman[1..], true);
        let decoded = decode_chunks(&[&first[..], &last[..]]).unwrap();
        assert_eq!(decoded, vec![Decoded::Message(Message::text("☃"))]);
    }

    #[test]
    fn test_many_single_byte_text_fragments() {
        let text = "aé☃".repeat(5_000);
        let bytes = text.as_bytes();

        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();
        cursor.append(client_frame(OpCode::Text, &bytes[..1], false));
        assert_eq!(decoder.decode(&mut cursor).unwrap(), None);

        for (i, byte) in bytes[1..bytes.len() - 1].iter().enumerate() {
            cursor.append(client_frame(OpCode::Continuation, &[*byte], false));
            assert_eq!(decoder.decode(&mut cursor).unwrap(), None);
            // Never more than one partial character left unchecked
            assert!(decoder.fragment_len() - decoder.utf8_checked < 4, "fragment {}", i);
        }

        cursor.append(client_frame(OpCode::Continuation, &bytes[bytes.len() - 1..], true));
        assert_eq!(
            decoder.decode(&mut cursor).unwrap(),
            Some(Decoded::Message(Message::text(text.clone())))
        );
        assert_eq!(decoder.utf8_checked, 0);
    }

    #[test]
    fn test_invalid_byte_in_later_fragment() {
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();
        cursor.append(client_frame(OpCode::Text, "ok ☃".as_bytes(), false));
        cursor.append(client_frame(OpCode::Continuation, b"fine", false));
        assert_eq!(decoder.decode(&mut cursor).unwrap(), None);

        cursor.append(client_frame(OpCode::Continuation, &[0xe2, 0x28], false));
        let err = decoder.decode(&mut cursor).unwrap_err();
        assert_eq!(err.close_code(), Some(1007));
        assert_eq!(decoder.fragment_len(), 0);
    }

    #[test]
    fn test_release_drops_fragment() {
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();
        cursor.append(client_frame(OpCode::Text, b"partial", false));
        assert_eq!(decoder.decode(&mut cursor).unwrap(), None);
        assert!(decoder.in_fragmented_message());

        decoder.release();
        assert!(!decoder.in_fragmented_message());
        assert_eq!(decoder.fragment_len(), 0);
    }

    #[test]
    fn test_close_frames() {
        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(b"bye");
        let wire = client_frame(OpCode::Close, &payload, true);
        assert_eq!(
            decode_chunks(&[&wire[..]]).unwrap(),
            vec![Decoded::Close(Some(CloseReason::new(1000, "bye")))]
        );

        let wire = client_frame(OpCode::Close, b"", true);
        assert_eq!(decode_chunks(&[&wire[..]]).unwrap(), vec![Decoded::Close(None)]);

        let wire = client_frame(OpCode::Close, &[0x03], true);
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));

        let wire = client_frame(OpCode::Close, &[0x03, 0xe8, 0xc3], true);
        assert_eq!(close_code_of(decode_chunks(&[&wire[..]])), Some(1002));
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut decoder = decoder();
        let mut cursor = ByteCursor::new();
        cursor.append(Bytes::from_static(&[0x83, 0x80, 0, 0, 0, 0]));
        assert!(decoder.decode(&mut cursor).is_err());

        cursor.append(client_frame(OpCode::Text, b"ok", true));
        assert!(matches!(
            decoder.decode(&mut cursor),
            Err(Error::DecoderFailed)
        ));
        assert_eq!(decoder.state(), DecodeState::Failed);
    }
}
