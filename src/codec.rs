//! Canonical header encoding
//!
//! The 88-byte form is what the search engine hashes and what the ledger node
//! receives (as lowercase hex). Integers are little-endian and each
//! variable-looking field carries a one-byte length prefix:
//!
//! ```text
//! [0x20][hash 32][0x14][address1 20][value u32][0x14][address2 20][flag u8][timestamp u32][nonce u32]
//! ```

use crate::types::{PuzzleHeader, ADDRESS_LEN, HASH_LEN};
use byteorder::{ByteOrder, LittleEndian};

/// Size of an encoded header
pub const ENCODED_LEN: usize = 88;

/// Hex length of an encoded header
pub const ENCODED_HEX_LEN: usize = ENCODED_LEN * 2;

/// Offset of the trailing nonce within the encoding
pub const NONCE_OFFSET: usize = ENCODED_LEN - 4;

/// Encode a header into its canonical 88 bytes
pub fn encode(header: &PuzzleHeader) -> [u8; ENCODED_LEN] {
    let mut out = [0u8; ENCODED_LEN];
    let mut pos = 0;

    out[pos] = HASH_LEN as u8;
    pos += 1;
    out[pos..pos + HASH_LEN].copy_from_slice(&header.hash);
    pos += HASH_LEN;

    out[pos] = ADDRESS_LEN as u8;
    pos += 1;
    out[pos..pos + ADDRESS_LEN].copy_from_slice(&header.address1);
    pos += ADDRESS_LEN;

    LittleEndian::write_u32(&mut out[pos..pos + 4], header.value);
    pos += 4;

    out[pos] = ADDRESS_LEN as u8;
    pos += 1;
    out[pos..pos + ADDRESS_LEN].copy_from_slice(&header.address2);
    pos += ADDRESS_LEN;

    out[pos] = header.flag;
    pos += 1;

    LittleEndian::write_u32(&mut out[pos..pos + 4], header.timestamp);
    pos += 4;

    debug_assert_eq!(pos, NONCE_OFFSET);
    LittleEndian::write_u32(&mut out[pos..pos + 4], header.nonce);

    out
}

/// Encode a header as 176 lowercase hex characters
pub fn encode_hex(header: &PuzzleHeader) -> String {
    hex::encode(encode(header))
}

/// Overwrite the nonce of an already encoded header
pub fn inject_nonce(encoded: &mut [u8; ENCODED_LEN], nonce: u32) {
    LittleEndian::write_u32(&mut encoded[NONCE_OFFSET..], nonce);
}
