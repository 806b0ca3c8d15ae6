pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors surfaced by the discovery facade.
///
/// A failed or cancelled query means "unknown", never "empty": callers must
/// not degrade a `Err` result to an empty collection.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Storage(#[from] argus_storage::StorageError),

    #[error("query cancelled")]
    Cancelled,
}
