//! Append-only bidirectional value ⇄ dense-id tables.

use crate::error::{Result, StorageError};
use crate::log::{open_log, LogWriter};
use crate::state::PersistentState;
use crate::util::{bincode_deserialize, bincode_serialize};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::path::Path;

const ENUMERATOR_MAGIC: [u8; 4] = *b"AGEN";

/// Interns values to dense non-negative ids, durably.
///
/// Ids are assigned in first-seen order starting at 1 and are never reused
/// for the life of the table; id 0 is reserved to mean "not present". Each
/// newly interned value appends one record to the backing log, so the same
/// value always resolves to the same id across reopens.
#[derive(Debug)]
pub struct PersistentEnumerator<V> {
    name: String,
    inner: Mutex<Inner<V>>,
}

#[derive(Debug)]
struct Inner<V> {
    by_value: HashMap<V, u32>,
    by_id: Vec<V>,
    writer: Option<LogWriter>,
}

impl<V> PersistentEnumerator<V>
where
    V: Clone + Eq + Hash + Serialize + DeserializeOwned,
{
    /// Open the table at `path`, replaying any previously interned values.
    ///
    /// A malformed log (torn tail, bad header, duplicate value) is a
    /// corruption error; the caller is expected to wipe and rebuild.
    pub fn open(path: &Path) -> Result<Self> {
        let (writer, records) = open_log(path, ENUMERATOR_MAGIC)?;

        let mut by_value = HashMap::with_capacity(records.len());
        let mut by_id = Vec::with_capacity(records.len());
        for record in &records {
            let value: V = bincode_deserialize(record)?;
            let id = by_id.len() as u32 + 1;
            if by_value.insert(value.clone(), id).is_some() {
                return Err(StorageError::DuplicateValue {
                    path: writer.path().to_path_buf(),
                    id,
                });
            }
            by_id.push(value);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "enumerator".to_string());

        Ok(Self {
            name,
            inner: Mutex::new(Inner {
                by_value,
                by_id,
                writer: Some(writer),
            }),
        })
    }

    /// Insert-or-get: returns the id for `value`, interning it if new.
    pub fn enumerate(&self, value: &V) -> Result<u32> {
        let mut inner = self.inner.lock();
        if let Some(&id) = inner.by_value.get(value) {
            return Ok(id);
        }

        let Some(writer) = inner.writer.as_mut() else {
            return Err(self.closed());
        };
        let record = bincode_serialize(value)?;
        writer.append(&record)?;

        let id = inner.by_id.len() as u32 + 1;
        inner.by_value.insert(value.clone(), id);
        inner.by_id.push(value.clone());
        Ok(id)
    }

    /// Lookup-only: never interns.
    pub fn try_enumerate(&self, value: &V) -> Result<Option<u32>> {
        let inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        Ok(inner.by_value.get(value).copied())
    }

    /// Exact inverse of a prior [`PersistentEnumerator::enumerate`];
    /// `value_of(0)` is always `None`.
    pub fn value_of(&self, id: u32) -> Result<Option<V>> {
        let inner = self.inner.lock();
        if inner.writer.is_none() {
            return Err(self.closed());
        }
        if id == 0 {
            return Ok(None);
        }
        Ok(inner.by_id.get(id as usize - 1).cloned())
    }

    /// Number of interned values.
    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            name: self.name.clone(),
        }
    }
}

impl<V> PersistentState for PersistentEnumerator<V>
where
    V: Clone + Eq + Hash + Serialize + DeserializeOwned + Send + Sync,
{
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

    fn open_strings(path: &Path) -> PersistentEnumerator<String> {
        PersistentEnumerator::open(path).unwrap()
    }

    #[test]
    fn round_trip_and_idempotent_ids() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_strings(&dir.path().join("className.enum"));

        let a = table.enumerate(&"com.example.Foo".to_string()).unwrap();
        let b = table.enumerate(&"com.example.Bar".to_string()).unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);
        assert_eq!(table.enumerate(&"com.example.Foo".to_string()).unwrap(), a);

        assert_eq!(table.value_of(a).unwrap().as_deref(), Some("com.example.Foo"));
        assert_eq!(table.value_of(0).unwrap(), None);
        assert_eq!(table.value_of(99).unwrap(), None);
    }

    #[test]
    fn try_enumerate_never_interns() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_strings(&dir.path().join("path.enum"));

        assert_eq!(table.try_enumerate(&"x".to_string()).unwrap(), None);
        assert_eq!(table.len(), 0);

        let id = table.enumerate(&"x".to_string()).unwrap();
        assert_eq!(table.try_enumerate(&"x".to_string()).unwrap(), Some(id));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn ids_are_stable_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("methodName.enum");

        let table = open_strings(&path);
        let first = table.enumerate(&"setUp".to_string()).unwrap();
        let second = table.enumerate(&"testFoo".to_string()).unwrap();
        table.close().unwrap();

        let table = open_strings(&path);
        assert_eq!(table.try_enumerate(&"setUp".to_string()).unwrap(), Some(first));
        assert_eq!(table.try_enumerate(&"testFoo".to_string()).unwrap(), Some(second));
        assert_eq!(table.enumerate(&"testBar".to_string()).unwrap(), 3);
    }

    #[test]
    fn torn_tail_is_corruption_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moduleName.enum");

        let table = open_strings(&path);
        table.enumerate(&"core".to_string()).unwrap();
        table.enumerate(&"util".to_string()).unwrap();
        table.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let err = PersistentEnumerator::<String>::open(&path).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn closed_table_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let table = open_strings(&dir.path().join("className.enum"));
        table.enumerate(&"a".to_string()).unwrap();
        table.close().unwrap();
        // Second close is a no-op.
        table.close().unwrap();

        assert!(matches!(
            table.enumerate(&"b".to_string()),
            Err(StorageError::Closed { .. })
        ));
        assert!(matches!(
            table.try_enumerate(&"a".to_string()),
            Err(StorageError::Closed { .. })
        ));
        assert!(matches!(table.flush(), Err(StorageError::Closed { .. })));
    }

    #[test]
    fn structs_enumerate_by_structural_equality() {
        #[derive(Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        struct Key {
            left: u32,
            right: u8,
        }

        let dir = tempfile::tempdir().unwrap();
        let table: PersistentEnumerator<Key> =
            PersistentEnumerator::open(&dir.path().join("testName.enum")).unwrap();

        let id = table.enumerate(&Key { left: 3, right: 9 }).unwrap();
        assert_eq!(table.enumerate(&Key { left: 3, right: 9 }).unwrap(), id);
        assert_ne!(table.enumerate(&Key { left: 3, right: 8 }).unwrap(), id);
    }
}
