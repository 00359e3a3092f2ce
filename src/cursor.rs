//! Exact-consumption buffer over incoming socket chunks
//!
//! The transport hands over data in whatever pieces it received them.
//! [`ByteCursor`] keeps those pieces as they are and lets the decoder take
//! exactly `n` bytes at a time, or nothing at all. A request that cannot be
//! satisfied leaves the cursor untouched, so the caller can simply retry
//! after the next [`ByteCursor::append`].

use std::collections::VecDeque;

use bytes::{BufMut, Bytes, BytesMut};

/// Ordered sequence of byte chunks with a read position
#[derive(Debug, Default)]
pub struct ByteCursor {
    chunks: VecDeque<Bytes>,
    /// Read offset into the front chunk
    offset: usize,
    /// Unread bytes across all chunks
    buffered: usize,
}

impl ByteCursor {
    /// Create an empty cursor
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a chunk received from the transport
    pub fn append(&mut self, chunk: impl Into<Bytes>) {
        let chunk = chunk.into();
        if chunk.is_empty() {
            return;
        }
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Number of unread bytes
    #[inline]
    pub fn available_bytes(&self) -> usize {
        self.buffered
    }

    /// Check if there is nothing left to read
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffered == 0
    }

    /// Number of chunks still holding unread bytes
    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Take exactly `n` bytes
    ///
    /// Returns `None` without consuming anything when fewer than `n` bytes
    /// are buffered. Bytes inside a single chunk are returned without
    /// copying; a request spanning chunks is reassembled.
    pub fn try_consume(&mut self, n: usize) -> Option<Bytes> {
        if n > self.buffered {
            return None;
        }
        if n == 0 {
            return Some(Bytes::new());
        }

        let front = &self.chunks[0];
        let front_left = front.len() - self.offset;

        if n <= front_left {
            let out = front.slice(self.offset..self.offset + n);
            self.advance_front(n);
            return Some(out);
        }

        let mut out = BytesMut::with_capacity(n);
        let mut needed = n;
        while needed > 0 {
            let front = &self.chunks[0];
            let take = needed.min(front.len() - self.offset);
            out.put_slice(&front[self.offset..self.offset + take]);
            self.advance_front(take);
            needed -= take;
        }
        Some(out.freeze())
    }

    /// Drop `n` bytes of the front chunk, popping it once exhausted
    fn advance_front(&mut self, n: usize) {
        self.offset += n;
        self.buffered -= n;
        if self.offset == self.chunks[0].len() {
            self.chunks.pop_front();
            self.offset = 0;
        }
    }

    /// Copy `N` bytes starting `offset` bytes past the read position
    fn peek_array<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        if offset.checked_add(N)? > self.buffered {
            return None;
        }

        let mut out = [0u8; N];
        let mut filled = 0;
        let mut skip = self.offset + offset;
        for chunk in &self.chunks {
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let take = (N - filled).min(chunk.len() - skip);
            out[filled..filled + take].copy_from_slice(&chunk[skip..skip + take]);
            filled += take;
            skip = 0;
            if filled == N {
                break;
            }
        }
        Some(out)
    }

    /// Look at one byte without consuming it
    #[inline]
    pub fn peek_u8(&self, offset: usize) -> Option<u8> {
        self.peek_array::<1>(offset).map(|b| b[0])
    }

    /// Look at a big-endian `u16` without consuming it
    #[inline]
    pub fn peek_u16_be(&self, offset: usize) -> Option<u16> {
        self.peek_array(offset).map(u16::from_be_bytes)
    }

    /// Look at a big-endian `u32` without consuming it
    #[inline]
    pub fn peek_u32_be(&self, offset: usize) -> Option<u32> {
        self.peek_array(offset).map(u32::from_be_bytes)
    }

    /// Look at a big-endian `u64` without consuming it
    #[inline]
    pub fn peek_u64_be(&self, offset: usize) -> Option<u64> {
        self.peek_array(offset).map(u64::from_be_bytes)
    }
}
