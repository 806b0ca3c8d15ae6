//! Persistence primitives for the Argus test-discovery engine.
//!
//! Three building blocks, each format-owning and domain-agnostic:
//!
//! - [`PersistentEnumerator`]: append-only bidirectional value ⇄ dense-id
//!   tables (name interning).
//! - [`AssociativeIndex`]: a generic forward/inverted index pair with
//!   generation-stamped snapshot persistence.
//! - [`ModuleUsageStore`]: an append-only multi-value membership log.
//!
//! All of them implement [`PersistentState`] so an engine can flush and close
//! them as a group.
//!
//! ## Corruption policy
//!
//! Reads verify everything they can (magic bytes, format versions, payload
//! fingerprints, generation agreement across an index pair) and report any
//! disagreement as a corruption-class [`StorageError`]. There is no repair
//! path: the owning engine deletes the storage directory and rebuilds from
//! scratch.

mod artifact;
mod assoc;
mod enumerator;
mod error;
mod fingerprint;
mod log;
mod modules;
mod state;
mod util;

pub use artifact::{read_artifact, write_artifact_atomic, ARTIFACT_FORMAT_VERSION};
pub use assoc::{AssociativeIndex, FORWARD_FILE_NAME, INVERTED_FILE_NAME};
pub use enumerator::PersistentEnumerator;
pub use error::{Result, StorageError};
pub use fingerprint::Fingerprint;
pub use modules::ModuleUsageStore;
pub use state::PersistentState;
pub use util::{atomic_write, BINCODE_PAYLOAD_LIMIT_BYTES};
