//! Session state persistence
//!
//! A paused session is written to `<state_dir>/mining_state_<id>.bin` so it
//! can be resumed later, possibly by another process. The file is a fixed
//! 120-byte little-endian record:
//!
//! ```text
//! nonce u32 | value u32 | timestamp u32 | flag u8
//! | 0x20 | hash 32 | 0x14 | address1 20 | 0x14 | address2 20
//! | target 32 (little-endian words)
//! ```
//!
//! The length bytes are checked on load so that a file from a different
//! layout is rejected instead of being misread.

use crate::target::Target;
use crate::types::{PuzzleHeader, SessionId, ADDRESS_LEN, HASH_LEN};
use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

/// Size of a persisted session record
pub const STATE_FILE_LEN: usize = 4 + 4 + 4 + 1 + 1 + HASH_LEN + 1 + ADDRESS_LEN + 1 + ADDRESS_LEN + Target::SIZE;

/// What survives a pause: the header (including the live nonce) and the target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub header: PuzzleHeader,
    pub target: Target,
}

impl SessionSnapshot {
    /// Serialize into the fixed record layout
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(STATE_FILE_LEN);
        // Writes into a Vec cannot fail
        let _ = self.write_to(&mut buf);
        buf
    }

    fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        let header = &self.header;
        w.write_u32::<LittleEndian>(header.nonce)?;
        w.write_u32::<LittleEndian>(header.value)?;
        w.write_u32::<LittleEndian>(header.timestamp)?;
        w.write_u8(header.flag)?;
        w.write_u8(HASH_LEN as u8)?;
        w.write_all(&header.hash)?;
        w.write_u8(ADDRESS_LEN as u8)?;
        w.write_all(&header.address1)?;
        w.write_u8(ADDRESS_LEN as u8)?;
        w.write_all(&header.address2)?;
        self.target.write_to(w)
    }

    /// Parse a record, validating its size and embedded lengths
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != STATE_FILE_LEN {
            return Err(Error::corrupt_state(format!(
                "expected {} bytes, got {}",
                STATE_FILE_LEN,
                bytes.len()
            )));
        }

        let mut cursor = Cursor::new(bytes);
        let nonce = cursor.read_u32::<LittleEndian>()?;
        let value = cursor.read_u32::<LittleEndian>()?;
        let timestamp = cursor.read_u32::<LittleEndian>()?;
        let flag = cursor.read_u8()?;
        if flag > 1 {
            return Err(Error::corrupt_state(format!("invalid flag {}", flag)));
        }

        let hash = read_prefixed::<HASH_LEN>(&mut cursor, "hash")?;
        let address1 = read_prefixed::<ADDRESS_LEN>(&mut cursor, "address1")?;
        let address2 = read_prefixed::<ADDRESS_LEN>(&mut cursor, "address2")?;

        let mut target_bytes = [0u8; Target::SIZE];
        cursor.read_exact(&mut target_bytes)?;
        let target = Target::from_bytes(&target_bytes)?;

        Ok(Self {
            header: PuzzleHeader {
                nonce,
                value,
                timestamp,
                flag,
                hash,
                address1,
                address2,
            },
            target,
        })
    }
}

fn read_prefixed<const N: usize>(cursor: &mut Cursor<&[u8]>, field: &str) -> Result<[u8; N]> {
    let len = cursor.read_u8()? as usize;
    if len != N {
        return Err(Error::corrupt_state(format!(
            "{} length byte is {}, expected {}",
            field, len, N
        )));
    }
    let mut bytes = [0u8; N];
    cursor.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Directory-backed store for paused sessions
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Create a store rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the state files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the state file for a session
    pub fn path_for(&self, session_id: &SessionId) -> PathBuf {
        self.dir.join(format!("mining_state_{}.bin", session_id))
    }

    /// Write a snapshot and return the file path.
    ///
    /// The record goes to a temporary sibling first and is renamed into
    /// place, so a reader never observes a partial file.
    #[instrument(skip(self, snapshot), fields(dir = %self.dir.display()))]
    pub async fn save(&self, session_id: &SessionId, snapshot: &SessionSnapshot) -> Result<PathBuf> {
        let path = self.path_for(session_id);
        let tmp = path.with_extension("bin.tmp");

        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(&tmp, snapshot.to_bytes()).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        debug!(path = %path.display(), nonce = snapshot.header.nonce, "Saved session state");
        Ok(path)
    }

    /// Read and validate a snapshot from any path
    #[instrument(skip(self))]
    pub async fn load(&self, path: &Path) -> Result<SessionSnapshot> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::corrupt_state(format!("cannot read {}: {}", path.display(), e))
        })?;
        let snapshot = SessionSnapshot::from_bytes(&bytes).map_err(|e| match e {
            Error::CorruptState { message } => {
                Error::corrupt_state(format!("{}: {}", path.display(), message))
            }
            other => other,
        })?;

        debug!(nonce = snapshot.header.nonce, "Loaded session state");
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use assert_matches::assert_matches;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn snapshot() -> SessionSnapshot {
        SessionSnapshot {
            header: PuzzleHeader {
                nonce: 123_456,
                value: 42,
                timestamp: 1_700_000_000,
                flag: 1,
                hash: [0x5a; 32],
                address1: [0x01; 20],
                address2: [0x02; 20],
            },
            target: Target::from_str(
                "000000ffffff0000000000000000000000000000000000000000000000000000",
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_record_layout() {
        let bytes = snapshot().to_bytes();
        assert_eq!(bytes.len(), STATE_FILE_LEN);
        assert_eq!(STATE_FILE_LEN, 120);
        assert_eq!(&bytes[0..4], &123_456u32.to_le_bytes());
        assert_eq!(bytes[12], 1);
        assert_eq!(bytes[13], 32);
        assert_eq!(bytes[46], 20);
        assert_eq!(bytes[67], 20);
    }

    #[test]
    fn test_rejects_wrong_size() {
        let bytes = snapshot().to_bytes();
        assert_matches!(
            SessionSnapshot::from_bytes(&bytes[..119]),
            Err(Error::CorruptState { .. })
        );
        let mut long = bytes.clone();
        long.push(0);
        assert_matches!(SessionSnapshot::from_bytes(&long), Err(Error::CorruptState { .. }));
    }

    #[test]
    fn test_rejects_wrong_length_byte() {
        let mut bytes = snapshot().to_bytes();
        bytes[13] = 31;
        let err = SessionSnapshot::from_bytes(&bytes).unwrap_err();
        assert_matches!(err, Error::CorruptState { .. });
        assert_eq!(err.kind(), ErrorKind::Internal);

        let mut bytes = snapshot().to_bytes();
        bytes[67] = 0x15;
        assert!(SessionSnapshot::from_bytes(&bytes).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let id = SessionId::new("abc123");

        let path = store.save(&id, &snapshot()).await.unwrap();
        assert_eq!(path, dir.path().join("mining_state_abc123.bin"));
        assert!(!path.with_extension("bin.tmp").exists());

        let loaded = store.load(&path).await.unwrap();
        assert_eq!(loaded, snapshot());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let err = store.load(&dir.path().join("nope.bin")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[tokio::test]
    async fn test_load_truncated_file() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        let path = dir.path().join("mining_state_short.bin");
        std::fs::write(&path, [0u8; 10]).unwrap();

        let err = store.load(&path).await.unwrap_err();
        assert!(err.to_string().contains("expected 120 bytes"));
    }
}
