//! Shared machinery for append-only record logs.
//!
//! A log is a header (magic + format version) followed by length-prefixed
//! records. Appends go through a buffered writer; [`LogWriter::flush`] makes
//! them durable. Replay is strict: a torn trailing record, an oversize length
//! prefix, or a malformed header is a corruption error, which the owning
//! engine answers by wiping the storage directory.

use crate::error::{Result, StorageError};
use crate::util::BINCODE_PAYLOAD_LIMIT_BYTES;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Cursor, Read, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever the log framing itself changes.
pub const LOG_FORMAT_VERSION: u32 = 1;

const LOG_HEADER_LEN: usize = 4 + 4;

#[derive(Debug)]
pub(crate) struct LogWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// Open (or create) the log at `path` and replay its records.
///
/// Returns the writer positioned at the end of the log plus every record's
/// raw bytes in append order.
pub(crate) fn open_log(path: &Path, magic: [u8; 4]) -> Result<(LogWriter, Vec<Vec<u8>>)> {
    let records = match std::fs::read(path) {
        Ok(bytes) => parse_log(path, magic, &bytes)?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let mut file = File::create(path)?;
            file.write_all(&magic)?;
            file.write_u32::<LittleEndian>(LOG_FORMAT_VERSION)?;
            file.sync_all()?;
            Vec::new()
        }
        Err(err) => return Err(err.into()),
    };

    let file = OpenOptions::new().append(true).open(path)?;
    Ok((
        LogWriter {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        },
        records,
    ))
}

fn parse_log(path: &Path, magic: [u8; 4], bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    if bytes.len() < LOG_HEADER_LEN {
        return Err(StorageError::Truncated {
            path: path.to_path_buf(),
        });
    }

    let mut cursor = Cursor::new(bytes);
    let mut found_magic = [0_u8; 4];
    cursor.read_exact(&mut found_magic)?;
    if found_magic != magic {
        return Err(StorageError::BadHeader {
            path: path.to_path_buf(),
        });
    }
    let found_version = cursor.read_u32::<LittleEndian>()?;
    if found_version != LOG_FORMAT_VERSION {
        return Err(StorageError::IncompatibleFormat {
            path: path.to_path_buf(),
            expected: LOG_FORMAT_VERSION,
            found: found_version,
        });
    }

    let mut records = Vec::new();
    let mut offset = LOG_HEADER_LEN;
    while offset < bytes.len() {
        let remaining = bytes.len() - offset;
        if remaining < 4 {
            return Err(StorageError::Truncated {
                path: path.to_path_buf(),
            });
        }
        let len = u32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ]) as usize;
        offset += 4;
        if len > BINCODE_PAYLOAD_LIMIT_BYTES {
            return Err(StorageError::OversizePayload {
                path: path.to_path_buf(),
                len: len as u64,
            });
        }
        if bytes.len() - offset < len {
            return Err(StorageError::Truncated {
                path: path.to_path_buf(),
            });
        }
        records.push(bytes[offset..offset + len].to_vec());
        offset += len;
    }
    Ok(records)
}

impl LogWriter {
    pub(crate) fn append(&mut self, record: &[u8]) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(record.len() as u32)?;
        self.writer.write_all(record)?;
        Ok(())
    }

    pub(crate) fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
