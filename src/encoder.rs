//! Outgoing frame serialization
//!
//! Server frames are never masked. Control payloads are limited to 125
//! bytes on the wire, so oversized ping/pong data and close reasons are cut
//! down before encoding.

use bytes::{BufMut, BytesMut};

use crate::SMALL_MESSAGE_THRESHOLD;
use crate::frame::{OpCode, encode_frame};
use crate::message::Message;

/// Serializes messages and control frames for one connection
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameEncoder;

impl FrameEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a single unmasked frame
    #[inline]
    pub fn frame(&self, buf: &mut BytesMut, opcode: OpCode, payload: &[u8], fin: bool) {
        encode_frame(buf, opcode, payload, fin, None);
    }

    /// Encode a message as one frame
    pub fn message(&self, buf: &mut BytesMut, msg: &Message) {
        self.frame(buf, msg.opcode(), msg.as_bytes(), true);
    }

    /// Encode a message as a sequence of frames of at most `chunk_size` bytes
    ///
    /// The first frame carries the message opcode, the rest are
    /// continuations, and only the last one has FIN set. A `chunk_size` of
    /// zero or one at least as large as the payload yields a single frame.
    pub fn fragmented(&self, buf: &mut BytesMut, msg: &Message, chunk_size: usize) {
        let payload = msg.as_bytes();
        if chunk_size == 0 || payload.len() <= chunk_size {
            self.message(buf, msg);
            return;
        }

        let mut chunks = payload.chunks(chunk_size).peekable();
        let mut opcode = msg.opcode();
        while let Some(chunk) = chunks.next() {
            let fin = chunks.peek().is_none();
            self.frame(buf, opcode, chunk, fin);
            opcode = OpCode::Continuation;
        }
    }

    /// Encode a ping
    pub fn ping(&self, buf: &mut BytesMut, payload: &[u8]) {
        self.frame(buf, OpCode::Ping, clamp_control(payload), true);
    }

    /// Encode a pong echoing `payload`
    ///
    /// Pings received from the peer are at most 125 bytes already, so the
    /// reply carries them byte-for-byte.
    pub fn pong(&self, buf: &mut BytesMut, payload: &[u8]) {
        self.frame(buf, OpCode::Pong, clamp_control(payload), true);
    }

    /// Encode a close frame
    ///
    /// `None` sends an empty close payload (no status code).
    pub fn close(&self, buf: &mut BytesMut, close: Option<(u16, &str)>) {
        let mut payload = BytesMut::with_capacity(SMALL_MESSAGE_THRESHOLD);
        if let Some((code, reason)) = close {
            payload.put_u16(code);
            payload.put_slice(truncate_utf8(reason, SMALL_MESSAGE_THRESHOLD - 2).as_bytes());
        }
        self.frame(buf, OpCode::Close, &payload, true);
    }
}

#[inline]
fn clamp_control(payload: &[u8]) -> &[u8] {
    &payload[..payload.len().min(SMALL_MESSAGE_THRESHOLD)]
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.message(&mut buf, &Message::text("hello"));

        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x05);
        assert_eq!(&buf[2..], b"hello");
    }

    #[test]
    fn test_mask_bit_never_set() {
        let enc = FrameEncoder::new();
        for len in [0usize, 125, 126, 65535, 65536] {
            let mut buf = BytesMut::new();
            enc.message(&mut buf, &Message::binary(vec![0u8; len]));
            assert_eq!(buf[1] & 0x80, 0, "length {}", len);
        }
    }

    #[test]
    fn test_fragmented() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.fragmented(&mut buf, &Message::text("Hello"), 3);

        assert_eq!(&buf[..], &[0x01, 0x03, b'H', b'e', b'l', 0x80, 0x02, b'l', b'o'][..]);
    }

    #[test]
    fn test_fragmented_exact_multiple() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.fragmented(&mut buf, &Message::binary(vec![1u8; 6]), 2);

        assert_eq!(buf.len(), 12);
        assert_eq!(buf[0], 0x02);
        assert_eq!(buf[4], 0x00);
        assert_eq!(buf[8], 0x80);
    }

    #[test]
    fn test_fragmented_single_frame_when_small() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.fragmented(&mut buf, &Message::binary(vec![1u8; 4]), 0);
        enc.fragmented(&mut buf, &Message::binary(vec![1u8; 4]), 4);
        assert_eq!(buf.len(), 12);
        assert_eq!(buf[0], 0x82);
        assert_eq!(buf[6], 0x82);
    }

    #[test]
    fn test_pong_copies_payload() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.pong(&mut buf, b"abc");
        assert_eq!(&buf[..], &[0x8A, 0x03, b'a', b'b', b'c'][..]);
    }

    #[test]
    fn test_close_frame() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        enc.close(&mut buf, Some((1000, "bye")));
        assert_eq!(&buf[..], &[0x88, 0x05, 0x03, 0xe8, b'b', b'y', b'e'][..]);

        let mut buf = BytesMut::new();
        enc.close(&mut buf, None);
        assert_eq!(&buf[..], &[0x88, 0x00][..]);
    }

    #[test]
    fn test_close_reason_truncated_on_char_boundary() {
        let enc = FrameEncoder::new();
        let mut buf = BytesMut::new();
        let reason = "é".repeat(100);
        enc.close(&mut buf, Some((1000, &reason)));

        assert!(buf[1] as usize <= SMALL_MESSAGE_THRESHOLD);
        let text = std::str::from_utf8(&buf[4..]).unwrap();
        assert_eq!(text.len(), 122);
    }
}
