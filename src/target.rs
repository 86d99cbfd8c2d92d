//! Difficulty targets
//!
//! A [`Target`] is a 256-bit threshold. A search succeeds when the digest of
//! the encoded header, read as a big-endian integer, is less than or equal to
//! the target. Targets are built from a 64-character hex string or expanded
//! from the compact 32-bit exponent/mantissa form.

use crate::{Error, Result};
use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// Mining target representing the difficulty threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Target {
    /// 256-bit target value stored as 4 64-bit words, least significant first
    words: [u64; 4],
}

impl Target {
    /// Size of the serialized target
    pub const SIZE: usize = 32;

    /// Create a new target from a 256-bit value
    pub fn new(words: [u64; 4]) -> Self {
        Self { words }
    }

    /// Create target from bytes (32 bytes, little-endian words)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(Error::target(format!(
                "Invalid target length: expected {} bytes, got {}",
                Self::SIZE,
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let words = [
            cursor.read_u64::<LittleEndian>()?,
            cursor.read_u64::<LittleEndian>()?,
            cursor.read_u64::<LittleEndian>()?,
            cursor.read_u64::<LittleEndian>()?,
        ];

        Ok(Self::new(words))
    }

    /// Convert target to bytes (32 bytes, little-endian words)
    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(self.words.iter()) {
            LittleEndian::write_u64(chunk, *word);
        }
        bytes
    }

    /// Write the little-endian form into any writer
    pub fn write_to<W: std::io::Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for word in &self.words {
            writer.write_u64::<LittleEndian>(*word)?;
        }
        Ok(())
    }

    /// Convert to hexadecimal string (big-endian for display)
    pub fn to_hex_be(&self) -> String {
        format!(
            "{:016x}{:016x}{:016x}{:016x}",
            self.words[3], self.words[2], self.words[1], self.words[0]
        )
    }

    /// Expand a compact difficulty encoding.
    ///
    /// The top byte is a byte-length exponent `e`, the low 23 bits are the
    /// mantissa `m`, and the value is `m * 256^(e - 3)`. Encodings with the
    /// sign bit (`0x00800000`) set, a zero mantissa, or a value that does not
    /// fit in 256 bits expand to the zero target, which no digest can meet
    /// except the all-zero one.
    pub fn from_compact(bits: u32) -> Self {
        let exponent = bits >> 24;
        let mantissa = bits & 0x007f_ffff;

        if mantissa == 0 || bits & 0x0080_0000 != 0 {
            return Self::min();
        }

        if exponent <= 3 {
            let value = mantissa >> (8 * (3 - exponent));
            return Self::new([u64::from(value), 0, 0, 0]);
        }

        let shift = 8 * (exponent - 3);
        let mantissa_bits = 32 - mantissa.leading_zeros();
        if shift + mantissa_bits > 256 {
            return Self::min();
        }

        let word = (shift / 64) as usize;
        let offset = shift % 64;
        let mantissa = u64::from(mantissa);
        let mut words = [0u64; 4];
        words[word] = mantissa << offset;
        if offset > 0 && word + 1 < 4 {
            words[word + 1] = mantissa >> (64 - offset);
        }
        Self::new(words)
    }

    /// Check whether a digest, read as a big-endian integer, is at or below the target
    pub fn is_met_by(&self, digest: &[u8; 32]) -> bool {
        for i in (0..4).rev() {
            let start = (3 - i) * 8;
            let digest_word = BigEndian::read_u64(&digest[start..start + 8]);
            match digest_word.cmp(&self.words[i]) {
                Ordering::Less => return true,
                Ordering::Greater => return false,
                Ordering::Equal => continue,
            }
        }
        true
    }

    /// Maximum possible target (easiest difficulty)
    pub fn max() -> Self {
        Self::new([u64::MAX; 4])
    }

    /// Minimum possible target (hardest difficulty)
    pub fn min() -> Self {
        Self::new([0; 4])
    }

    /// Number of leading zero bits a digest needs to meet this target
    pub fn leading_zero_bits(&self) -> u32 {
        for i in (0..4).rev() {
            if self.words[i] != 0 {
                return (3 - i as u32) * 64 + self.words[i].leading_zeros();
            }
        }
        256
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(Error::target(format!(
                "Invalid target hex length: expected 64 chars, got {}",
                s.len()
            )));
        }
        if !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::target("Target contains non-hexadecimal characters"));
        }

        // Parse as big-endian hex string
        let mut words = [0u64; 4];
        for i in 0..4 {
            let start = i * 16;
            let end = start + 16;
            words[3 - i] = u64::from_str_radix(&s[start..end], 16)
                .map_err(|e| Error::target(format!("Invalid hex in target: {}", e)))?;
        }

        Ok(Self::new(words))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_be())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex_be())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}
