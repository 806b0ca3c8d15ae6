use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors produced by the persistent tables and index pairs.
///
/// Two kinds matter to callers: corruption (the on-disk data cannot be
/// trusted; the owning engine wipes and rebuilds) and transient I/O on a
/// table that otherwise opened fine (propagated as a checked failure).
/// [`StorageError::is_corruption`] makes the split explicit.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("bad header in {path}")]
    BadHeader { path: PathBuf },

    #[error("incompatible format version in {path}: expected {expected}, found {found}")]
    IncompatibleFormat {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("truncated data in {path}")]
    Truncated { path: PathBuf },

    #[error("payload in {path} exceeds size limit: {len} bytes")]
    OversizePayload { path: PathBuf, len: u64 },

    #[error("fingerprint mismatch in {path}")]
    FingerprintMismatch { path: PathBuf },

    #[error("generation mismatch in {dir}: forward {forward}, inverted {inverted}")]
    GenerationMismatch {
        dir: PathBuf,
        forward: u64,
        inverted: u64,
    },

    #[error("index pair in {dir} is missing one side")]
    IncompletePair { dir: PathBuf },

    #[error("duplicate value at id {id} in {path}")]
    DuplicateValue { path: PathBuf, id: u32 },

    #[error("{table} references unknown id {id}")]
    DanglingId { table: String, id: u32 },

    #[error("{name} is closed")]
    Closed { name: String },
}

impl StorageError {
    /// Returns `true` for errors that mean the on-disk data cannot be
    /// trusted, as opposed to a transient I/O failure or a closed handle.
    pub fn is_corruption(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Closed { .. })
    }
}
