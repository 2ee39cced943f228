// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! CRC-32 as computed by the MCU's CRC unit with byte-reversed input and
//! reversed, complemented output, seeded with `0xFFFF_FFFF`.
//!
//! The unit consumes 32-bit words most significant byte first, so data that
//! sits in memory as little-endian words is fed one word at a time with its
//! bytes swapped. The polynomial, seed, reflection and final XOR are those of
//! the common zlib CRC-32.

use consts::FLASH_HALF_PAGE_WORDS;
use crc::{Crc, Digest, CRC_32_ISO_HDLC};

pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Incremental checksum over a byte stream of little-endian words.
///
/// Chunks may be split anywhere, a partial word is carried over to the next
/// [`update`](ImageDigest::update). A trailing partial word is zero padded on
/// [`finalize`](ImageDigest::finalize).
pub struct ImageDigest {
    digest: Digest<'static, u32>,
    carry: [u8; 4],
    carry_len: usize,
}

impl ImageDigest {
    pub fn new() -> Self {
        Self {
            digest: CRC32.digest(),
            carry: [0; 4],
            carry_len: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        for &byte in data {
            self.carry[self.carry_len] = byte;
            self.carry_len += 1;
            if self.carry_len == 4 {
                self.feed_carry();
            }
        }
    }

    pub fn finalize(mut self) -> u32 {
        if self.carry_len != 0 {
            self.carry[self.carry_len..].fill(0);
            self.feed_carry();
        }
        self.digest.finalize()
    }

    fn feed_carry(&mut self) {
        let mut word = self.carry;
        word.reverse();
        self.digest.update(&word);
        self.carry_len = 0;
    }
}

impl Default for ImageDigest {
    fn default() -> Self {
        Self::new()
    }
}

/// Checksum of a complete buffer.
pub fn checksum(data: &[u8]) -> u32 {
    let mut digest = ImageDigest::new();
    digest.update(data);
    digest.finalize()
}

/// Checksum of one half-page worth of words, as handed to the programmer.
pub fn half_page_checksum(words: &[u32; FLASH_HALF_PAGE_WORDS]) -> u32 {
    let mut digest = CRC32.digest();
    for word in words {
        digest.update(&word.to_be_bytes());
    }
    digest.finalize()
}

/// Compare a half-page against an expected checksum.
pub fn verify_half_page(words: &[u32; FLASH_HALF_PAGE_WORDS], expected: u32) -> bool {
    half_page_checksum(words) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_check_value() {
        // Standard check value of the underlying algorithm.
        assert_eq!(CRC32.checksum(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn words_are_fed_byte_swapped() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x01];
        let swapped = [0x04, 0x03, 0x02, 0x01, 0x01, 0x07, 0x06, 0x05];
        assert_eq!(checksum(&data), CRC32.checksum(&swapped));
    }

    #[test]
    fn chunking_does_not_change_the_result() {
        let data: [u8; 200] = core::array::from_fn(|i| (i * 7 + 3) as u8);
        let whole = checksum(&data);

        for split in [1, 3, 4, 63, 64, 65, 199] {
            let mut digest = ImageDigest::new();
            digest.update(&data[..split]);
            digest.update(&data[split..]);
            assert_eq!(digest.finalize(), whole, "split at {split}");
        }
    }

    #[test]
    fn partial_word_is_zero_padded() {
        assert_eq!(checksum(&[0xAA, 0xBB]), checksum(&[0xAA, 0xBB, 0, 0]));
    }

    #[test]
    fn any_single_byte_corruption_is_detected() {
        let data: [u8; 192] = core::array::from_fn(|i| (i * 13) as u8);
        let good = checksum(&data);
        for idx in 0..data.len() {
            for bit in 0..8 {
                let mut bad = data;
                bad[idx] ^= 1 << bit;
                assert_ne!(checksum(&bad), good, "byte {idx} bit {bit}");
            }
        }
    }

    #[test]
    fn half_page_matches_memory_layout() {
        let words: [u32; FLASH_HALF_PAGE_WORDS] =
            core::array::from_fn(|i| 0x0102_0304u32.wrapping_mul(i as u32 + 1));
        let mut bytes = [0u8; 64];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words.iter()) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let expected = checksum(&bytes);
        assert_eq!(half_page_checksum(&words), expected);
        assert!(verify_half_page(&words, expected));
        assert!(!verify_half_page(&words, expected ^ 1));
    }
}
