use argus_storage::{PersistentState, StorageError};
use parking_lot::Mutex;
use std::sync::Arc;

struct Tracked {
    state: Arc<dyn PersistentState>,
}

/// Owns every open persistent object of an engine.
///
/// The registry exists so group operations (a low-memory flush, teardown)
/// see a consistent set of objects, and so a background flush can run while
/// normal callers keep working: the registry lock is only held to snapshot
/// the tracked set, never across the per-object flushes themselves.
#[derive(Default)]
pub struct StorageRegistry {
    tracked: Mutex<Vec<Tracked>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&self, state: Arc<dyn PersistentState>) {
        self.tracked.lock().push(Tracked { state });
    }

    /// Best-effort flush of every tracked object.
    ///
    /// A failure on one object is logged and does not prevent flushing the
    /// rest.
    pub fn flush_all(&self) {
        let snapshot: Vec<Arc<dyn PersistentState>> = self
            .tracked
            .lock()
            .iter()
            .map(|tracked| tracked.state.clone())
            .collect();

        for state in snapshot {
            if let Err(err) = state.flush() {
                tracing::warn!(
                    target = "argus.index",
                    state = state.state_name(),
                    error = %err,
                    "failed to flush persistent state"
                );
            }
        }
    }

    /// Close every tracked object.
    ///
    /// With `ignore_errors` false the first failure aborts the teardown and
    /// is returned (normal dispose). With `ignore_errors` true failures are
    /// logged and swallowed (recovery: the directory underneath is about to
    /// be deleted anyway).
    pub fn close_all(&self, ignore_errors: bool) -> Result<(), StorageError> {
        let snapshot: Vec<Arc<dyn PersistentState>> = self
            .tracked
            .lock()
            .iter()
            .map(|tracked| tracked.state.clone())
            .collect();

        for state in snapshot {
            match state.close() {
                Ok(()) => {}
                Err(err) if ignore_errors => {
                    tracing::warn!(
                        target = "argus.index",
                        state = state.state_name(),
                        error = %err,
                        "ignoring close failure during recovery"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Drop the tracked set without closing anything. Used right before a
    /// re-attempted construction after a wipe, when the files underneath are
    /// already gone.
    pub fn clear(&self) {
        self.tracked.lock().clear();
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked.lock().len()
    }
}
