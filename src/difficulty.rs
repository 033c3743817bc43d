//! Proof-of-work difficulty targets.
//!
//! A target is a 256-bit threshold a block digest must not exceed. The
//! compact form packs it as `exponent:u8 | mantissa:u24`, read as
//! `mantissa << 8*(exponent-3)`. Inside a packed header the target
//! occupies 32 little-endian bytes, which keeps the header fixed-width
//! and byte-for-byte reproducible even for targets the compact form
//! cannot represent exactly.

use thiserror::Error;

pub const TARGET_LENGTH: usize = 32;

/// Compact form of the difficulty-1 target: the easiest threshold,
/// maximal mantissa at maximal exponent.
const ONE_BITS: u32 = 0x20ff_ffff;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DifficultyError {
    #[error("compact target is malformed: {0:#010x}")]
    MalformedBits(u32),
    #[error("buffer too short for a packed target")]
    ShortBuffer,
}

/// A 256-bit threshold with its compact representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Difficulty {
    bits: u32,
    target: [u8; TARGET_LENGTH], // big-endian
}

impl Difficulty {
    /// Difficulty 1: the easiest target a block digest can satisfy.
    pub fn new() -> Self {
        Difficulty {
            bits: ONE_BITS,
            target: expand(ONE_BITS),
        }
    }

    /// Build from the compact `exponent | mantissa` form.
    pub fn from_bits(bits: u32) -> Result<Self, DifficultyError> {
        if bits >> 24 > 32 {
            return Err(DifficultyError::MalformedBits(bits));
        }
        Ok(Difficulty {
            bits,
            target: expand(bits),
        })
    }

    pub fn bits(&self) -> u32 {
        self.bits
    }

    /// The 256-bit threshold, big-endian.
    pub fn target(&self) -> &[u8; TARGET_LENGTH] {
        &self.target
    }

    /// Append the header wire form: the target, little-endian.
    pub fn pack_into(&self, buffer: &mut Vec<u8>) {
        buffer.extend(self.target.iter().rev());
    }

    /// Decode the header wire form from the front of `buffer`.
    pub fn unpack(buffer: &[u8]) -> Result<(Self, usize), DifficultyError> {
        if buffer.len() < TARGET_LENGTH {
            return Err(DifficultyError::ShortBuffer);
        }
        let mut target = [0u8; TARGET_LENGTH];
        for (i, byte) in buffer[..TARGET_LENGTH].iter().rev().enumerate() {
            target[i] = *byte;
        }
        Ok((
            Difficulty {
                bits: compress(&target),
                target,
            },
            TARGET_LENGTH,
        ))
    }

    /// Display difficulty: how many times harder this target is than
    /// difficulty 1.
    pub fn reciprocal(&self) -> f64 {
        let own = target_to_f64(&self.target);
        if own == 0.0 {
            return f64::INFINITY;
        }
        target_to_f64(&expand(ONE_BITS)) / own
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::new()
    }
}

fn expand(bits: u32) -> [u8; TARGET_LENGTH] {
    let exponent = (bits >> 24) as usize;
    let mantissa = bits & 0x00ff_ffff;
    let mut target = [0u8; TARGET_LENGTH];
    if exponent <= 3 {
        let value = mantissa >> (8 * (3 - exponent));
        target[31] = (value & 0xff) as u8;
        target[30] = ((value >> 8) & 0xff) as u8;
        target[29] = ((value >> 16) & 0xff) as u8;
    } else {
        let position = TARGET_LENGTH - exponent;
        target[position] = (mantissa >> 16) as u8;
        target[position + 1] = ((mantissa >> 8) & 0xff) as u8;
        target[position + 2] = (mantissa & 0xff) as u8;
    }
    target
}

fn compress(target: &[u8; TARGET_LENGTH]) -> u32 {
    let first = match target.iter().position(|&b| b != 0) {
        Some(first) => first,
        None => return 0,
    };
    let exponent = (TARGET_LENGTH - first) as u32;
    let mut mantissa = u32::from(target[first]) << 16;
    if first + 1 < TARGET_LENGTH {
        mantissa |= u32::from(target[first + 1]) << 8;
    }
    if first + 2 < TARGET_LENGTH {
        mantissa |= u32::from(target[first + 2]);
    }
    (exponent << 24) | mantissa
}

fn target_to_f64(target: &[u8; TARGET_LENGTH]) -> f64 {
    let first = match target.iter().position(|&b| b != 0) {
        Some(first) => first,
        None => return 0.0,
    };
    let window_end = TARGET_LENGTH.min(first + 8);
    let mut value = 0u64;
    for &byte in &target[first..window_end] {
        value = (value << 8) | u64::from(byte);
    }
    let bits_below = 8 * (TARGET_LENGTH - window_end) as i32;
    (value as f64) * 2f64.powi(bits_below)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_difficulty_one() {
        let one = Difficulty::new();
        assert_eq!(one.bits(), 0x20ff_ffff);
        let target = one.target();
        assert_eq!(&target[..3], &[0xff, 0xff, 0xff]);
        assert!(target[3..].iter().all(|&b| b == 0));
        assert!((one.reciprocal() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_expand_known_bitcoin_bits() {
        let difficulty = Difficulty::from_bits(0x1d00_ffff).unwrap();
        let target = difficulty.target();
        assert_eq!(&target[..6], &[0x00, 0x00, 0x00, 0x00, 0xff, 0xff]);
        assert!(target[6..].iter().all(|&b| b == 0));
        assert!(difficulty.reciprocal() > 1.0);
    }

    #[test]
    fn test_compact_round_trip() {
        for bits in [0x20ff_ffff, 0x1d00_ffff, 0x1b04_04cb, 0x1703_4219, 0x0301_0000] {
            let difficulty = Difficulty::from_bits(bits).unwrap();
            assert_eq!(compress(difficulty.target()), bits, "bits {:#010x}", bits);
        }
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let difficulty = Difficulty::from_bits(0x1d00_ffff).unwrap();
        let mut buffer = Vec::new();
        difficulty.pack_into(&mut buffer);
        assert_eq!(buffer.len(), TARGET_LENGTH);
        // wire form is little-endian: the mantissa lands near the end
        assert_eq!(buffer[27], 0xff);
        assert_eq!(buffer[26], 0xff);
        let (unpacked, used) = Difficulty::unpack(&buffer).unwrap();
        assert_eq!(used, TARGET_LENGTH);
        assert_eq!(unpacked, difficulty);
    }

    #[test]
    fn test_malformed_exponent() {
        assert_eq!(
            Difficulty::from_bits(0x21ff_ffff),
            Err(DifficultyError::MalformedBits(0x21ff_ffff))
        );
        assert_eq!(
            Difficulty::unpack(&[0u8; 16]),
            Err(DifficultyError::ShortBuffer)
        );
    }
}
