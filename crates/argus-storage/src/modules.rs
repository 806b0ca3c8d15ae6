//! Append-only test ⇄ module membership store.

use crate::enumerator::PersistentEnumerator;
use crate::error::{Result, StorageError};
use crate::log::{open_log, LogWriter};
use crate::state::PersistentState;
use crate::util::{bincode_deserialize, bincode_serialize};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

const MODULE_LOG_MAGIC: [u8; 4] = *b"AGMD";

#[derive(Debug, Serialize, Deserialize)]
enum ModuleRecord {
    Append { test: u32, module: u32 },
    Remove { test: u32 },
}

/// Records which build modules each test has run under.
///
/// The backing log is append-only: membership additions and whole-set
/// removals are records, replayed on open. Re-appending an already-present
/// module id is a no-op and writes nothing.
pub struct ModuleUsageStore {
    name: String,
    inner: Mutex<Inner>,
}

struct Inner {
    by_test: HashMap<u32, HashSet<u32>>,
    writer: Option<LogWriter>,
}

impl ModuleUsageStore {
    pub fn open(path: &Path) -> Result<Self> {
        let (writer, records) = open_log(path, MODULE_LOG_MAGIC)?;

        let mut by_test: HashMap<u32, HashSet<u32>> = HashMap::new();
        for record in &records {
            match bincode_deserialize::<ModuleRecord>(record)? {
                ModuleRecord::Append { test, module } => {
                    by_test.entry(test).or_default().insert(module);
                }
                ModuleRecord::Remove { test } => {
                    by_test.remove(&test);
                }
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "testModule.index".to_string());

        Ok(Self {
            name,
            inner: Mutex::new(Inner {
                by_test,
                writer: Some(writer),
            }),
        })
    }

    /// Add `module` to the test's module set; a no-op if already present.
    pub fn append(&self, test: u32, module: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        if inner
            .by_test
            .get(&test)
            .is_some_and(|modules| modules.contains(&module))
        {
            return Ok(());
        }

        let record = bincode_serialize(&ModuleRecord::Append { test, module })?;
        let Some(writer) = inner.writer.as_mut() else {
            return Err(self.closed());
        };
        writer.append(&record)?;
        inner.by_test.entry(test).or_default().insert(module);
        Ok(())
    }

    /// The module ids recorded for `test`; empty if none.
    pub fn module_ids(&self, test: u32) -> Result<HashSet<u32>> {
        let inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        Ok(inner.by_test.get(&test).cloned().unwrap_or_default())
    }

    /// Resolve the test's module ids to names via the module name table.
    ///
    /// An id that fails to resolve is logged and skipped: a missing module
    /// name is cosmetic and must not fail the query.
    pub fn module_names(
        &self,
        test: u32,
        names: &PersistentEnumerator<String>,
    ) -> Result<Vec<String>> {
        let ids = self.module_ids(test)?;
        let mut resolved = Vec::with_capacity(ids.len());
        for id in ids {
            match names.value_of(id)? {
                Some(name) => resolved.push(name),
                None => {
                    tracing::warn!(
                        target = "argus.storage",
                        test,
                        module_id = id,
                        "skipping module id with no name table entry"
                    );
                }
            }
        }
        Ok(resolved)
    }

    /// Drop the entire module set for `test`.
    pub fn remove(&self, test: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        if !inner.by_test.contains_key(&test) {
            return Ok(());
        }

        let record = bincode_serialize(&ModuleRecord::Remove { test })?;
        let Some(writer) = inner.writer.as_mut() else {
            return Err(self.closed());
        };
        writer.append(&record)?;
        inner.by_test.remove(&test);
        Ok(())
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            name: self.name.clone(),
        }
    }
}

impl PersistentState for ModuleUsageStore {
    fn state_name(&self) -> &str {
        &self.name
    }

    fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Err(self.closed()),
        }
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(mut writer) = inner.writer.take() else {
            return Ok(());
        };
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testModule.index");
        let store = ModuleUsageStore::open(&path).unwrap();

        store.append(1, 10).unwrap();
        store.append(1, 10).unwrap();
        store.append(1, 11).unwrap();
        assert_eq!(store.module_ids(1).unwrap(), HashSet::from([10, 11]));
        store.close().unwrap();

        // The duplicate append wrote nothing: replay yields the same set.
        let store = ModuleUsageStore::open(&path).unwrap();
        assert_eq!(store.module_ids(1).unwrap(), HashSet::from([10, 11]));
    }

    #[test]
    fn sets_are_isolated_per_test() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModuleUsageStore::open(&dir.path().join("testModule.index")).unwrap();

        store.append(1, 10).unwrap();
        store.append(2, 20).unwrap();
        assert_eq!(store.module_ids(1).unwrap(), HashSet::from([10]));
        assert_eq!(store.module_ids(2).unwrap(), HashSet::from([20]));
        assert!(store.module_ids(3).unwrap().is_empty());
    }

    #[test]
    fn remove_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("testModule.index");

        let store = ModuleUsageStore::open(&path).unwrap();
        store.append(1, 10).unwrap();
        store.append(2, 20).unwrap();
        store.remove(1).unwrap();
        store.close().unwrap();

        let store = ModuleUsageStore::open(&path).unwrap();
        assert!(store.module_ids(1).unwrap().is_empty());
        assert_eq!(store.module_ids(2).unwrap(), HashSet::from([20]));
    }

    #[test]
    fn unresolvable_module_id_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModuleUsageStore::open(&dir.path().join("testModule.index")).unwrap();
        let names: PersistentEnumerator<String> =
            PersistentEnumerator::open(&dir.path().join("moduleName.enum")).unwrap();

        let core = names.enumerate(&"core".to_string()).unwrap();
        store.append(1, core).unwrap();
        // An id the name table never assigned, as a partial write would leave.
        store.append(1, 999).unwrap();

        let resolved = store.module_names(1, &names).unwrap();
        assert_eq!(resolved, vec!["core".to_string()]);
    }

    #[test]
    fn closed_store_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModuleUsageStore::open(&dir.path().join("testModule.index")).unwrap();
        store.close().unwrap();
        store.close().unwrap();

        assert!(matches!(store.append(1, 2), Err(StorageError::Closed { .. })));
        assert!(matches!(store.module_ids(1), Err(StorageError::Closed { .. })));
        assert!(matches!(store.remove(1), Err(StorageError::Closed { .. })));
    }
}
