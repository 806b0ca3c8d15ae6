//! Versioned snapshot artifacts.
//!
//! An artifact is a single file holding one bincode-encoded table:
//!
//! - magic bytes (4, identifying the artifact kind)
//! - format version (`u32`, little-endian)
//! - generation (`u64`, little-endian)
//! - payload length (`u64`, little-endian)
//! - payload fingerprint (64 hex bytes, SHA-256 of the payload)
//! - payload (bincode)
//!
//! Everything the header claims is verified on read; any disagreement is a
//! corruption error, and the owning engine recovers by wiping the storage
//! directory and rebuilding.

use crate::error::{Result, StorageError};
use crate::fingerprint::{Fingerprint, FINGERPRINT_HEX_LEN};
use crate::util::{atomic_write, bincode_deserialize, bincode_serialize, BINCODE_PAYLOAD_LIMIT_BYTES};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{Cursor, Read};
use std::path::Path;

/// Bumped whenever the artifact framing itself changes.
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 4 + 4 + 8 + 8 + FINGERPRINT_HEX_LEN;

/// Serialize `value` and write it to `path` atomically under the given magic
/// and generation stamp.
pub fn write_artifact_atomic<T: Serialize>(
    path: &Path,
    magic: [u8; 4],
    generation: u64,
    value: &T,
) -> Result<()> {
    let payload = bincode_serialize(value)?;
    let fingerprint = Fingerprint::from_bytes(&payload);

    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    bytes.extend_from_slice(&magic);
    bytes.write_u32::<LittleEndian>(ARTIFACT_FORMAT_VERSION)?;
    bytes.write_u64::<LittleEndian>(generation)?;
    bytes.write_u64::<LittleEndian>(payload.len() as u64)?;
    bytes.extend_from_slice(fingerprint.as_str().as_bytes());
    bytes.extend_from_slice(&payload);

    atomic_write(path, &bytes)
}

/// Read an artifact written by [`write_artifact_atomic`].
///
/// Returns `Ok(None)` if the file does not exist (a fresh table); every other
/// failure mode is an error. The payload fingerprint and length are verified
/// before deserialization.
pub fn read_artifact<T: DeserializeOwned>(
    path: &Path,
    magic: [u8; 4],
) -> Result<Option<(u64, T)>> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    if bytes.len() < HEADER_LEN {
        return Err(StorageError::Truncated {
            path: path.to_path_buf(),
        });
    }

    let mut cursor = Cursor::new(&bytes);
    let mut found_magic = [0_u8; 4];
    cursor.read_exact(&mut found_magic)?;
    if found_magic != magic {
        return Err(StorageError::BadHeader {
            path: path.to_path_buf(),
        });
    }

    let found_version = cursor.read_u32::<LittleEndian>()?;
    if found_version != ARTIFACT_FORMAT_VERSION {
        return Err(StorageError::IncompatibleFormat {
            path: path.to_path_buf(),
            expected: ARTIFACT_FORMAT_VERSION,
            found: found_version,
        });
    }

    let generation = cursor.read_u64::<LittleEndian>()?;
    let payload_len = cursor.read_u64::<LittleEndian>()?;
    if payload_len > BINCODE_PAYLOAD_LIMIT_BYTES as u64 {
        return Err(StorageError::OversizePayload {
            path: path.to_path_buf(),
            len: payload_len,
        });
    }

    let mut fingerprint_hex = [0_u8; FINGERPRINT_HEX_LEN];
    cursor.read_exact(&mut fingerprint_hex)?;
    let expected = std::str::from_utf8(&fingerprint_hex)
        .ok()
        .and_then(Fingerprint::from_hex)
        .ok_or_else(|| StorageError::BadHeader {
            path: path.to_path_buf(),
        })?;

    let payload = &bytes[HEADER_LEN..];
    if payload.len() as u64 != payload_len {
        return Err(StorageError::Truncated {
            path: path.to_path_buf(),
        });
    }
    if Fingerprint::from_bytes(payload) != expected {
        return Err(StorageError::FingerprintMismatch {
            path: path.to_path_buf(),
        });
    }

    let value = bincode_deserialize(payload)?;
    Ok(Some((generation, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MAGIC: [u8; 4] = *b"AGTT";

    #[test]
    fn round_trip_with_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.idx");

        let mut table = HashMap::new();
        table.insert(1_u32, vec!["a".to_string(), "b".to_string()]);
        table.insert(7_u32, vec![]);

        write_artifact_atomic(&path, MAGIC, 42, &table).unwrap();
        let (generation, loaded): (u64, HashMap<u32, Vec<String>>) =
            read_artifact(&path, MAGIC).unwrap().unwrap();
        assert_eq!(generation, 42);
        assert_eq!(loaded, table);
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<(u64, Vec<u32>)> =
            read_artifact(&dir.path().join("absent.idx"), MAGIC).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn wrong_magic_is_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.idx");
        write_artifact_atomic(&path, MAGIC, 1, &vec![1_u32]).unwrap();

        let err = read_artifact::<Vec<u32>>(&path, *b"XXXX").unwrap_err();
        assert!(matches!(err, StorageError::BadHeader { .. }));
        assert!(err.is_corruption());
    }

    #[test]
    fn truncated_file_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.idx");
        write_artifact_atomic(&path, MAGIC, 1, &vec![1_u32, 2, 3]).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let err = read_artifact::<Vec<u32>>(&path, MAGIC).unwrap_err();
        assert!(matches!(err, StorageError::Truncated { .. }));
    }

    #[test]
    fn flipped_payload_byte_is_fingerprint_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.idx");
        write_artifact_atomic(&path, MAGIC, 1, &vec![1_u32, 2, 3]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_artifact::<Vec<u32>>(&path, MAGIC).unwrap_err();
        assert!(matches!(err, StorageError::FingerprintMismatch { .. }));
    }

    #[test]
    fn future_format_version_is_incompatible() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.idx");
        write_artifact_atomic(&path, MAGIC, 1, &vec![1_u32]).unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let err = read_artifact::<Vec<u32>>(&path, MAGIC).unwrap_err();
        assert!(matches!(err, StorageError::IncompatibleFormat { .. }));
    }
}
