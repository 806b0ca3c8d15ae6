//! The discovery facade: name-based query/update API over the persistent
//! stores.

use crate::bootstrap;
use crate::error::{DiscoveryError, Result};
use crate::identity::{FrameworkId, TestIdentity};
use crate::memory::{MemoryPressureBus, SubscriptionId};
use crate::registry::StorageRegistry;
use crate::sources::{is_test_data_path, UsedSources};
use argus_storage::{
    AssociativeIndex, ModuleUsageStore, PersistentEnumerator, StorageError,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// On-disk schema version. Bumped whenever the encoding of any table
/// changes; a mismatch wipes the whole directory — there is no migration
/// path between versions.
pub const ENGINE_VERSION: u32 = 1;

const CLASS_NAMES_FILE: &str = "className.enum";
const METHOD_NAMES_FILE: &str = "methodName.enum";
const PATHS_FILE: &str = "path.enum";
const TEST_NAMES_FILE: &str = "testName.enum";
const MODULE_NAMES_FILE: &str = "moduleName.enum";
const CLASS_USAGE_DIR: &str = "discoveredTests.index";
const FILE_USAGE_DIR: &str = "testFiles.index";
const MODULE_USAGE_FILE: &str = "testModule.index";

/// Construction-time configuration for a [`DiscoveryIndex`].
#[derive(Clone)]
pub struct DiscoveryConfig {
    /// Storage directory, one per project/configuration.
    pub root: PathBuf,
    /// Low-memory event source to subscribe a background flush to.
    pub memory_bus: Option<MemoryPressureBus>,
}

impl DiscoveryConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            memory_bus: None,
        }
    }

    pub fn with_memory_bus(mut self, bus: MemoryPressureBus) -> Self {
        self.memory_bus = Some(bus);
        self
    }
}

struct Stores {
    class_names: Arc<PersistentEnumerator<String>>,
    method_names: Arc<PersistentEnumerator<String>>,
    paths: Arc<PersistentEnumerator<String>>,
    module_names: Arc<PersistentEnumerator<String>>,
    test_identities: Arc<PersistentEnumerator<TestIdentity>>,
    class_usage: Arc<AssociativeIndex<u32, Vec<u32>>>,
    file_usage: Arc<AssociativeIndex<u32, ()>>,
    modules: Arc<ModuleUsageStore>,
}

struct EngineInner {
    registry: StorageRegistry,
    stores: Stores,
}

struct Lifecycle {
    disposed: bool,
    subscription: Option<SubscriptionId>,
}

/// Snapshot of table sizes, for diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub traced_tests: usize,
    pub class_names: usize,
    pub method_names: usize,
    pub file_paths: usize,
    pub module_names: usize,
    pub test_identities: usize,
}

/// Persistent test-discovery index.
///
/// Records, for every previously executed test, which classes/methods and
/// test-data files it touched and which build modules it ran under, then
/// answers reverse queries without re-running anything. All operations are
/// synchronous; the engine assumes a single logical writer with interleaved
/// readers and does no multi-process locking.
///
/// Result collections are unordered; callers must not depend on iteration
/// order.
pub struct DiscoveryIndex {
    inner: Arc<EngineInner>,
    bus: Option<MemoryPressureBus>,
    lifecycle: Mutex<Lifecycle>,
}

fn open_stores(root: &Path) -> std::result::Result<(StorageRegistry, Stores), StorageError> {
    let registry = StorageRegistry::new();

    let opened = (|| -> std::result::Result<Stores, StorageError> {
        let class_names: Arc<PersistentEnumerator<String>> =
            Arc::new(PersistentEnumerator::open(&root.join(CLASS_NAMES_FILE))?);
        registry.track(class_names.clone());
        let method_names: Arc<PersistentEnumerator<String>> =
            Arc::new(PersistentEnumerator::open(&root.join(METHOD_NAMES_FILE))?);
        registry.track(method_names.clone());
        let paths: Arc<PersistentEnumerator<String>> =
            Arc::new(PersistentEnumerator::open(&root.join(PATHS_FILE))?);
        registry.track(paths.clone());
        let module_names: Arc<PersistentEnumerator<String>> =
            Arc::new(PersistentEnumerator::open(&root.join(MODULE_NAMES_FILE))?);
        registry.track(module_names.clone());
        let test_identities: Arc<PersistentEnumerator<TestIdentity>> =
            Arc::new(PersistentEnumerator::open(&root.join(TEST_NAMES_FILE))?);
        registry.track(test_identities.clone());

        let class_usage: Arc<AssociativeIndex<u32, Vec<u32>>> =
            Arc::new(AssociativeIndex::open(&root.join(CLASS_USAGE_DIR))?);
        registry.track(class_usage.clone());
        let file_usage: Arc<AssociativeIndex<u32, ()>> =
            Arc::new(AssociativeIndex::open(&root.join(FILE_USAGE_DIR))?);
        registry.track(file_usage.clone());
        let modules = Arc::new(ModuleUsageStore::open(&root.join(MODULE_USAGE_FILE))?);
        registry.track(modules.clone());

        Ok(Stores {
            class_names,
            method_names,
            paths,
            module_names,
            test_identities,
            class_usage,
            file_usage,
            modules,
        })
    })();

    match opened {
        Ok(stores) => Ok((registry, stores)),
        Err(err) => {
            // The directory is about to be wiped; close failures don't matter.
            let _ = registry.close_all(true);
            registry.clear();
            Err(err)
        }
    }
}

fn dangling(table: &str, id: u32) -> DiscoveryError {
    StorageError::DanglingId {
        table: table.to_string(),
        id,
    }
    .into()
}

impl DiscoveryIndex {
    /// Open (or create) the index under `config.root`.
    ///
    /// Corruption is recovered automatically: the directory is wiped and the
    /// open retried, bounded to [`crate::MAX_OPEN_ATTEMPTS`] attempts.
    /// Exhausting the bound panics — two consecutive wipes that still fail
    /// to produce a clean open mean the filesystem itself is broken.
    pub fn open(config: DiscoveryConfig) -> Self {
        let (registry, stores) =
            bootstrap::open_with_recovery(&config.root, ENGINE_VERSION, open_stores);
        let inner = Arc::new(EngineInner { registry, stores });

        let subscription = config.memory_bus.as_ref().map(|bus| {
            let weak = Arc::downgrade(&inner);
            bus.subscribe(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.registry.flush_all();
                }
            }))
        });

        Self {
            inner,
            bus: config.memory_bus,
            lifecycle: Mutex::new(Lifecycle {
                disposed: false,
                subscription,
            }),
        }
    }

    /// True iff usage data was ever recorded for this test — including a run
    /// that touched nothing, which is distinct from "never indexed".
    pub fn has_test_trace(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
    ) -> Result<bool> {
        let Some(test_id) = self.try_test_id(class_name, method_name, framework)? else {
            return Ok(false);
        };
        Ok(self.inner.stores.class_usage.contains_forward(test_id)?)
    }

    /// Erase the test's class-usage entry and module set.
    ///
    /// The file-usage index is deliberately left alone: affected-files
    /// history outlives a forgotten test. The test's id is not reclaimed.
    pub fn remove_test_trace(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
    ) -> Result<()> {
        let Some(test_id) = self.try_test_id(class_name, method_name, framework)? else {
            return Ok(());
        };
        let stores = &self.inner.stores;
        stores.class_usage.update(test_id, None)?;
        stores.modules.remove(test_id)?;
        Ok(())
    }

    /// Record one test run: the methods it executed (grouped by class), the
    /// files it read, and the module it ran under.
    ///
    /// This is the single write path. Every name is enumerated to an id
    /// before either index is touched, so a partial failure never leaves an
    /// index referencing an unresolvable id. Files are filtered to test-data
    /// paths; both index entries are written even when empty.
    pub fn update_test_data(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
        used_methods: &HashMap<String, Vec<String>>,
        used_files: &[String],
        module_name: Option<&str>,
    ) -> Result<()> {
        let stores = &self.inner.stores;

        let class_id = stores.class_names.enumerate(&class_name.to_string())?;
        let method_id = stores.method_names.enumerate(&method_name.to_string())?;
        let test_id = stores.test_identities.enumerate(&TestIdentity {
            class_id,
            method_id,
            framework_id: framework.0,
        })?;

        let mut used = UsedSources::default();
        for (used_class, methods) in used_methods {
            let used_class_id = stores.class_names.enumerate(used_class)?;
            let mut method_ids = Vec::with_capacity(methods.len());
            for method in methods {
                let id = stores.method_names.enumerate(method)?;
                if !method_ids.contains(&id) {
                    method_ids.push(id);
                }
            }
            used.methods_by_class.insert(used_class_id, method_ids);
        }
        for file in used_files {
            if !is_test_data_path(file) {
                continue;
            }
            used.touched_files.insert(stores.paths.enumerate(file)?);
        }
        let module_id = match module_name {
            Some(name) => Some(stores.module_names.enumerate(&name.to_string())?),
            None => None,
        };

        let file_associations: HashMap<u32, ()> =
            used.touched_files.iter().map(|&file| (file, ())).collect();
        stores.class_usage.update(test_id, Some(used.methods_by_class))?;
        stores.file_usage.update(test_id, Some(file_associations))?;
        if let Some(module_id) = module_id {
            stores.modules.append(test_id, module_id)?;
        }

        tracing::debug!(
            target = "argus.index",
            class = class_name,
            method = method_name,
            %framework,
            test_id,
            "recorded test run"
        );
        Ok(())
    }

    /// Every test (as class → methods) that touched the given test-data file.
    pub fn get_tests_by_file(
        &self,
        path: &str,
        framework: FrameworkId,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>> {
        let stores = &self.inner.stores;
        let Some(file_id) = stores.paths.try_enumerate(&path.to_string())? else {
            return Ok(HashMap::new());
        };
        let Some(bucket) = stores.file_usage.inverted_entries(&file_id)? else {
            return Ok(HashMap::new());
        };

        let mut result = HashMap::new();
        for (test_id, ()) in bucket {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            self.collect_test(test_id, framework, &mut result)?;
        }
        Ok(result)
    }

    /// Every test that executed at least one method of the given class.
    pub fn get_tests_by_class_name(
        &self,
        class_name: &str,
        framework: FrameworkId,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>> {
        let stores = &self.inner.stores;
        let Some(class_id) = stores.class_names.try_enumerate(&class_name.to_string())? else {
            return Ok(HashMap::new());
        };
        let Some(bucket) = stores.class_usage.inverted_entries(&class_id)? else {
            return Ok(HashMap::new());
        };

        let mut result = HashMap::new();
        for (test_id, _method_ids) in bucket {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            self.collect_test(test_id, framework, &mut result)?;
        }
        Ok(result)
    }

    /// Every test that executed the given method specifically.
    pub fn get_tests_by_method_name(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
        cancel: &CancellationToken,
    ) -> Result<HashMap<String, Vec<String>>> {
        let stores = &self.inner.stores;
        let Some(class_id) = stores.class_names.try_enumerate(&class_name.to_string())? else {
            return Ok(HashMap::new());
        };
        let Some(method_id) = stores.method_names.try_enumerate(&method_name.to_string())? else {
            return Ok(HashMap::new());
        };
        let Some(bucket) = stores.class_usage.inverted_entries(&class_id)? else {
            return Ok(HashMap::new());
        };

        let mut result = HashMap::new();
        for (test_id, method_ids) in bucket {
            if cancel.is_cancelled() {
                return Err(DiscoveryError::Cancelled);
            }
            if !method_ids.contains(&method_id) {
                continue;
            }
            self.collect_test(test_id, framework, &mut result)?;
        }
        Ok(result)
    }

    /// The test-data files recorded for this test, from the forward side of
    /// the file-usage index.
    pub fn get_affected_files(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
    ) -> Result<Vec<String>> {
        let Some(test_id) = self.try_test_id(class_name, method_name, framework)? else {
            return Ok(Vec::new());
        };
        let stores = &self.inner.stores;
        let Some(file_ids) = stores.file_usage.get_forward(test_id)? else {
            return Ok(Vec::new());
        };

        let mut files = Vec::with_capacity(file_ids.len());
        for file_id in file_ids {
            let path = stores
                .paths
                .value_of(file_id)?
                .ok_or_else(|| dangling(PATHS_FILE, file_id))?;
            files.push(path);
        }
        Ok(files)
    }

    /// The modules this test has run under.
    pub fn get_test_modules_by_method_name(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
    ) -> Result<Vec<String>> {
        let Some(test_id) = self.try_test_id(class_name, method_name, framework)? else {
            return Ok(Vec::new());
        };
        let stores = &self.inner.stores;
        Ok(stores
            .modules
            .module_names(test_id, &stores.module_names)?)
    }

    /// Best-effort flush of every persistent object.
    pub fn flush(&self) {
        self.inner.registry.flush_all();
    }

    /// Tear the engine down. Terminal: every subsequent operation fails with
    /// a closed-state error. Safe to call twice.
    pub fn dispose(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.disposed {
            return Ok(());
        }
        if let (Some(bus), Some(id)) = (&self.bus, lifecycle.subscription.take()) {
            bus.unsubscribe(id);
        }
        self.inner.registry.close_all(false)?;
        lifecycle.disposed = true;
        Ok(())
    }

    pub fn stats(&self) -> DiscoveryStats {
        let stores = &self.inner.stores;
        DiscoveryStats {
            traced_tests: stores.class_usage.subject_count(),
            class_names: stores.class_names.len(),
            method_names: stores.method_names.len(),
            file_paths: stores.paths.len(),
            module_names: stores.module_names.len(),
            test_identities: stores.test_identities.len(),
        }
    }

    fn try_test_id(
        &self,
        class_name: &str,
        method_name: &str,
        framework: FrameworkId,
    ) -> Result<Option<u32>> {
        let stores = &self.inner.stores;
        let Some(class_id) = stores.class_names.try_enumerate(&class_name.to_string())? else {
            return Ok(None);
        };
        let Some(method_id) = stores.method_names.try_enumerate(&method_name.to_string())? else {
            return Ok(None);
        };
        Ok(stores.test_identities.try_enumerate(&TestIdentity {
            class_id,
            method_id,
            framework_id: framework.0,
        })?)
    }

    /// Resolve one indexed test back to names and add it to `out`, skipping
    /// tests recorded under a different framework.
    fn collect_test(
        &self,
        test_id: u32,
        framework: FrameworkId,
        out: &mut HashMap<String, Vec<String>>,
    ) -> Result<()> {
        let stores = &self.inner.stores;
        let Some(identity) = stores.test_identities.value_of(test_id)? else {
            return Err(dangling(TEST_NAMES_FILE, test_id));
        };
        if identity.framework_id != framework.0 {
            return Ok(());
        }
        let class = stores
            .class_names
            .value_of(identity.class_id)?
            .ok_or_else(|| dangling(CLASS_NAMES_FILE, identity.class_id))?;
        let method = stores
            .method_names
            .value_of(identity.method_id)?
            .ok_or_else(|| dangling(METHOD_NAMES_FILE, identity.method_id))?;
        out.entry(class).or_default().push(method);
        Ok(())
    }
}
