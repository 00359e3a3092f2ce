//! WebSocket frame masking
//!
//! Client-to-server payloads are XORed with a repeating 4-byte key
//! (RFC 6455 §5.3). Masking is its own inverse, so the same routine
//! unmasks incoming data.

/// Apply a WebSocket mask in place
///
/// Byte `i` of `data` is XORed with `mask[i % 4]`.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    if data.is_empty() {
        return;
    }

    // 8 bytes per iteration, the key repeats twice in one word
    let wide = u64::from_ne_bytes([
        mask[0], mask[1], mask[2], mask[3], mask[0], mask[1], mask[2], mask[3],
    ]);

    let mut chunks = data.chunks_exact_mut(8);
    for chunk in &mut chunks {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        let xored = u64::from_ne_bytes(word) ^ wide;
        chunk.copy_from_slice(&xored.to_ne_bytes());
    }

    // Remainder starts on a key boundary since 8 is a multiple of 4
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_mask_naive(data: &mut [u8], mask: [u8; 4]) {
        for (i, b) in data.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    #[test]
    fn test_mask_matches_naive() {
        let mask = [0x37, 0xfa, 0x21, 0x3d];
        for len in [0, 1, 3, 4, 7, 8, 9, 15, 16, 17, 100, 1023] {
            let original: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let mut fast = original.clone();
            let mut naive = original.clone();
            apply_mask(&mut fast, mask);
            apply_mask_naive(&mut naive, mask);
            assert_eq!(fast, naive, "len {}", len);
        }
    }

    #[test]
    fn test_mask_roundtrip() {
        let mask = [0x01, 0x02, 0x03, 0x04];
        let original = b"The quick brown fox jumps over the lazy dog".to_vec();
        let mut data = original.clone();
        apply_mask(&mut data, mask);
        assert_ne!(data, original);
        apply_mask(&mut data, mask);
        assert_eq!(data, original);
    }

    #[test]
    fn test_mask_empty() {
        let mut data: [u8; 0] = [];
        apply_mask(&mut data, [1, 2, 3, 4]);
        apply_mask(&mut data, [1, 2, 3, 4]);
        assert!(data.is_empty());
    }
}
