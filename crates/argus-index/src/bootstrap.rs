//! Directory bootstrap: version gate + bounded wipe-and-retry.

use argus_storage::{atomic_write, Result as StorageResult, StorageError};
use std::path::Path;

/// Name of the file holding the engine's on-disk schema version.
pub const VERSION_FILE_NAME: &str = "index.version";

/// Total open attempts before giving up. Two consecutive wipes that still
/// fail to produce a clean open mean the filesystem itself is broken, which
/// is not a recoverable runtime condition.
pub const MAX_OPEN_ATTEMPTS: u32 = 3;

/// The persisted schema version, or `None` if the file is absent or
/// unreadable (both mean "wipe and start over").
pub(crate) fn read_version(root: &Path) -> Option<u32> {
    let bytes = std::fs::read(root.join(VERSION_FILE_NAME)).ok()?;
    std::str::from_utf8(&bytes).ok()?.trim().parse().ok()
}

pub(crate) fn write_version(root: &Path, version: u32) -> StorageResult<()> {
    atomic_write(&root.join(VERSION_FILE_NAME), format!("{version}\n").as_bytes())
}

/// Delete the entire storage directory and recreate it empty.
pub(crate) fn wipe_storage(root: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(root) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err),
    }
    std::fs::create_dir_all(root)
}

/// Make sure `root` exists and carries exactly `version`.
///
/// Any mismatch — including a missing or unparseable version file — wipes
/// the directory. There is no migration path between versions.
pub(crate) fn ensure_version(root: &Path, version: u32) -> StorageResult<()> {
    std::fs::create_dir_all(root)?;
    let found = read_version(root);
    if found == Some(version) {
        return Ok(());
    }

    tracing::info!(
        target = "argus.index",
        root = %root.display(),
        expected = version,
        found = ?found,
        "schema version mismatch; wiping storage directory"
    );
    wipe_storage(root)?;
    write_version(root, version)
}

/// Run `open` against `root`, wiping and retrying on failure, up to
/// [`MAX_OPEN_ATTEMPTS`] attempts total.
///
/// The opener is responsible for closing whatever it partially opened before
/// returning an error (the registry's lenient `close_all` exists for this).
/// Exhausting the attempt bound panics: at that point the environment is
/// broken and continuing would only loop forever.
pub(crate) fn open_with_recovery<T>(
    root: &Path,
    version: u32,
    mut open: impl FnMut(&Path) -> Result<T, StorageError>,
) -> T {
    let mut last_err = None;
    for attempt in 1..=MAX_OPEN_ATTEMPTS {
        match ensure_version(root, version).and_then(|()| open(root)) {
            Ok(opened) => {
                if attempt > 1 {
                    tracing::info!(
                        target = "argus.index",
                        root = %root.display(),
                        attempt,
                        "storage opened after wipe"
                    );
                }
                return opened;
            }
            Err(err) => {
                tracing::warn!(
                    target = "argus.index",
                    root = %root.display(),
                    attempt,
                    error = %err,
                    corruption = err.is_corruption(),
                    "failed to open test discovery storage"
                );
                last_err = Some(err);
                if attempt < MAX_OPEN_ATTEMPTS {
                    if let Err(wipe_err) = wipe_storage(root) {
                        tracing::warn!(
                            target = "argus.index",
                            root = %root.display(),
                            error = %wipe_err,
                            "failed to wipe storage directory"
                        );
                    }
                }
            }
        }
    }

    let err = last_err.map(|err| err.to_string()).unwrap_or_default();
    panic!("test discovery storage at {} failed to open after {MAX_OPEN_ATTEMPTS} attempts: {err}",
        root.display());
}
