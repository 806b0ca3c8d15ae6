use crate::error::Result;

/// The uniform lifecycle surface of every persistent object.
///
/// An engine tracks all of its open tables and index pairs behind this trait
/// so it can flush them as a group (e.g. on a low-memory signal) and close
/// them as a group at teardown.
pub trait PersistentState: Send + Sync {
    /// Short stable name for logging, usually the on-disk file name.
    fn state_name(&self) -> &str;

    /// Make all buffered writes durable.
    fn flush(&self) -> Result<()>;

    /// Flush and release the underlying file. Idempotent; every operation
    /// other than `close` fails once the object is closed.
    fn close(&self) -> Result<()>;
}
