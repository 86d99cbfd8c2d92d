//! Core types for mining sessions
//!
//! Fundamental types used throughout the coordinator: the fixed-shape puzzle
//! header, session identifiers and the session state machine.

use crate::utils::current_timestamp_millis;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Length of the previous-reference digest
pub const HASH_LEN: usize = 32;

/// Length of each opaque address
pub const ADDRESS_LEN: usize = 20;

/// Puzzle header: the unit of work and, once solved, the submitted ticket.
///
/// The byte-array fields have fixed lengths, so a header with a short or long
/// hash or address cannot be constructed; malformed input is rejected while
/// decoding hex, before a header exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PuzzleHeader {
    /// Search variable advanced by the engine
    pub nonce: u32,
    /// Height-like quantity
    pub value: u32,
    /// Unix time in seconds
    pub timestamp: u32,
    /// Policy bit, 0 or 1
    pub flag: u8,
    /// Previous-reference digest; all zero means "none"
    pub hash: [u8; HASH_LEN],
    pub address1: [u8; ADDRESS_LEN],
    pub address2: [u8; ADDRESS_LEN],
}

impl PuzzleHeader {
    /// Create a header with the nonce reset to zero
    pub fn new(
        hash: [u8; HASH_LEN],
        address1: [u8; ADDRESS_LEN],
        address2: [u8; ADDRESS_LEN],
        value: u32,
        timestamp: u32,
        flag: u8,
    ) -> Self {
        Self {
            nonce: 0,
            value,
            timestamp,
            flag,
            hash,
            address1,
            address2,
        }
    }

    /// Build a header from hex-encoded fields.
    ///
    /// An empty `hash` means the all-zero digest. Addresses must be exactly
    /// 40 hex characters and `flag` must be 0 or 1.
    pub fn from_hex_fields(
        hash: &str,
        address1: &str,
        address2: &str,
        value: u32,
        timestamp: u32,
        flag: u8,
    ) -> Result<Self> {
        let hash = if hash.is_empty() {
            [0u8; HASH_LEN]
        } else {
            decode_fixed_hex::<HASH_LEN>("hash", hash)?
        };
        let address1 = decode_fixed_hex::<ADDRESS_LEN>("addr1", address1)?;
        let address2 = decode_fixed_hex::<ADDRESS_LEN>("addr2", address2)?;

        if flag > 1 {
            return Err(Error::invalid_argument(format!(
                "Invalid flag: expected 0 or 1, got {}",
                flag
            )));
        }

        Ok(Self::new(hash, address1, address2, value, timestamp, flag))
    }
}

/// Decode a hex string into a fixed-length byte array
pub fn decode_fixed_hex<const N: usize>(field: &str, hex_str: &str) -> Result<[u8; N]> {
    if hex_str.len() != N * 2 {
        return Err(Error::invalid_argument(format!(
            "Invalid hex string for {}: expected {} hex chars, got {}",
            field,
            N * 2,
            hex_str.len()
        )));
    }

    let mut bytes = [0u8; N];
    hex::decode_to_slice(hex_str, &mut bytes)
        .map_err(|e| Error::invalid_argument(format!("Invalid hex string for {}: {}", field, e)))?;
    Ok(bytes)
}

/// Opaque session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an id received from a caller
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the id as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Generates session ids that are unique for the generator's lifetime.
///
/// Ids are `millis(12 hex) | sequence(>= 6 hex) | random(4 hex)`. The
/// sequence number is strictly increasing, so two ids from one generator
/// never collide even when requested within the same millisecond.
#[derive(Debug, Default)]
pub struct SessionIdGenerator {
    sequence: AtomicU64,
}

impl SessionIdGenerator {
    /// Create a new generator
    pub fn new() -> Self {
        Self::default()
    }

    /// Produce the next id
    pub fn next_id(&self) -> SessionId {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix: u16 = rand::random();
        SessionId(format!(
            "{:012x}{:06x}{:04x}",
            current_timestamp_millis(),
            sequence,
            suffix
        ))
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// A worker is searching
    Mining,
    /// Paused and persisted; the session will not run again
    Idle,
    /// The engine found a nonce meeting the target
    Completed,
    /// The search ended without a solution
    Failed,
}

impl SessionState {
    /// Whether a worker currently owns the session
    pub fn is_mining(&self) -> bool {
        matches!(self, SessionState::Mining)
    }

    /// Completed and Failed sessions never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Mining => write!(f, "mining"),
            SessionState::Idle => write!(f, "idle"),
            SessionState::Completed => write!(f, "completed"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}
