//! Persistent test-discovery index engine.
//!
//! Durably records, for every previously executed test, which source
//! classes/methods and which test-data files it touched, and which build
//! modules it ran under — then answers reverse queries ("which tests
//! exercise this file/class/method?") without re-running anything.
//!
//! The facade is [`DiscoveryIndex`]; everything it persists lives in one
//! storage directory whose schema is gated by [`ENGINE_VERSION`]. Corruption
//! and version mismatches are recovered by wiping the directory and
//! rebuilding — usage data is a cache over past test runs and can always be
//! re-collected.

mod bootstrap;
mod error;
mod identity;
mod index;
mod memory;
mod registry;
mod sources;

pub use bootstrap::{MAX_OPEN_ATTEMPTS, VERSION_FILE_NAME};
pub use error::{DiscoveryError, Result};
pub use identity::{FrameworkId, TestIdentity};
pub use index::{DiscoveryConfig, DiscoveryIndex, DiscoveryStats, ENGINE_VERSION};
pub use memory::{LowMemoryListener, MemoryPressureBus, SubscriptionId};
pub use registry::StorageRegistry;
