//! Generic forward/inverted index pairs.

use crate::artifact::{read_artifact, write_artifact_atomic};
use crate::error::{Result, StorageError};
use crate::state::PersistentState;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::path::{Path, PathBuf};

const FORWARD_MAGIC: [u8; 4] = *b"AGFW";
const INVERTED_MAGIC: [u8; 4] = *b"AGIV";

pub const FORWARD_FILE_NAME: &str = "forward.idx";
pub const INVERTED_FILE_NAME: &str = "inverted.idx";

/// A bidirectional association index over one `(subject, key, payload)`
/// triple.
///
/// The forward side maps a subject id to the set of keys it is associated
/// with; the inverted side maps a key to every subject carrying it, along
/// with a per-(key, subject) payload. A forward entry may be present but
/// empty, which is distinct from absent: "known, no usage" vs "never
/// indexed".
///
/// Both sides persist as snapshot artifacts stamped with the same generation
/// counter. A crash that lands between the two file replacements leaves the
/// generations unequal, which [`AssociativeIndex::open`] reports as
/// corruption rather than serving a torn pair.
#[derive(Debug)]
pub struct AssociativeIndex<K, P> {
    name: String,
    dir: PathBuf,
    state: Mutex<State<K, P>>,
}

#[derive(Debug)]
struct State<K, P> {
    forward: HashMap<u32, HashSet<K>>,
    inverted: HashMap<K, HashMap<u32, P>>,
    generation: u64,
    dirty: bool,
    closed: bool,
}

impl<K, P> AssociativeIndex<K, P>
where
    K: Clone + Eq + Hash + Serialize + DeserializeOwned,
    P: Clone + Serialize + DeserializeOwned,
{
    /// Open the pair stored in `dir`, creating an empty pair if absent.
    pub fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let forward = read_artifact::<HashMap<u32, HashSet<K>>>(
            &dir.join(FORWARD_FILE_NAME),
            FORWARD_MAGIC,
        )?;
        let inverted = read_artifact::<HashMap<K, HashMap<u32, P>>>(
            &dir.join(INVERTED_FILE_NAME),
            INVERTED_MAGIC,
        )?;

        let (forward, inverted, generation) = match (forward, inverted) {
            (None, None) => (HashMap::new(), HashMap::new(), 0),
            (Some((gen_f, forward)), Some((gen_i, inverted))) => {
                if gen_f != gen_i {
                    return Err(StorageError::GenerationMismatch {
                        dir: dir.to_path_buf(),
                        forward: gen_f,
                        inverted: gen_i,
                    });
                }
                (forward, inverted, gen_f)
            }
            // One side written, the other never made it: a torn pair.
            (Some(_), None) | (None, Some(_)) => {
                return Err(StorageError::IncompletePair {
                    dir: dir.to_path_buf(),
                });
            }
        };

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "index".to_string());

        Ok(Self {
            name,
            dir: dir.to_path_buf(),
            state: Mutex::new(State {
                forward,
                inverted,
                generation,
                dirty: false,
                closed: false,
            }),
        })
    }

    /// Replace the subject's association set.
    ///
    /// `None` clears the forward entry and removes the subject from every
    /// inverted bucket it used to belong to. `Some` with an empty map writes
    /// an empty-but-present forward entry.
    pub fn update(&self, subject: u32, associations: Option<HashMap<K, P>>) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed());
        }

        if let Some(old_keys) = state.forward.remove(&subject) {
            for key in old_keys {
                let drop_bucket = match state.inverted.get_mut(&key) {
                    Some(bucket) => {
                        bucket.remove(&subject);
                        bucket.is_empty()
                    }
                    None => false,
                };
                if drop_bucket {
                    state.inverted.remove(&key);
                }
            }
        }

        if let Some(associations) = associations {
            let keys: HashSet<K> = associations.keys().cloned().collect();
            for (key, payload) in associations {
                state.inverted.entry(key).or_default().insert(subject, payload);
            }
            state.forward.insert(subject, keys);
        }

        state.dirty = true;
        Ok(())
    }

    /// The subject's key set, if a forward entry exists (possibly empty).
    pub fn get_forward(&self, subject: u32) -> Result<Option<HashSet<K>>> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed());
        }
        Ok(state.forward.get(&subject).cloned())
    }

    /// True iff a (possibly empty) forward entry exists for the subject.
    pub fn contains_forward(&self, subject: u32) -> Result<bool> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed());
        }
        Ok(state.forward.contains_key(&subject))
    }

    /// Snapshot of one inverted bucket: every `(subject, payload)` filed
    /// under `key`. `None` if no subject carries the key.
    pub fn inverted_entries(&self, key: &K) -> Result<Option<Vec<(u32, P)>>> {
        let state = self.state.lock();
        if state.closed {
            return Err(self.closed());
        }
        Ok(state.inverted.get(key).map(|bucket| {
            bucket
                .iter()
                .map(|(&subject, payload)| (subject, payload.clone()))
                .collect()
        }))
    }

    /// Number of subjects with a forward entry.
    pub fn subject_count(&self) -> usize {
        self.state.lock().forward.len()
    }

    fn closed(&self) -> StorageError {
        StorageError::Closed {
            name: self.name.clone(),
        }
    }

    fn flush_locked(&self, state: &mut State<K, P>) -> Result<()> {
        if !state.dirty {
            return Ok(());
        }
        let generation = state.generation + 1;
        write_artifact_atomic(
            &self.dir.join(FORWARD_FILE_NAME),
            FORWARD_MAGIC,
            generation,
            &state.forward,
        )?;
        write_artifact_atomic(
            &self.dir.join(INVERTED_FILE_NAME),
            INVERTED_MAGIC,
            generation,
            &state.inverted,
        )?;
        state.generation = generation;
        state.dirty = false;
        Ok(())
    }
}

impl<K, P> PersistentState for AssociativeIndex<K, P>
where
    K: Clone + Eq + Hash + Serialize + DeserializeOwned + Send + Sync,
    P: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    fn state_name(&self) -> &str {
        &self.name
    }

    fn flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(self.closed());
        }
        self.flush_locked(&mut state)
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        self.flush_locked(&mut state)?;
        state.closed = true;
        Ok(())
    }
}
