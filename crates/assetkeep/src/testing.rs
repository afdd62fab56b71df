//! In-memory backend doubles for tests.
//!
//! Enabled for this crate's own tests and, through the `testing` feature,
//! for downstream crates' test suites.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::asset::{Asset, AssetLoader, Backend, InstanceId, Instantiator, Resource};
use crate::error::{BoxError, Result};
use crate::handle::{AssetHandle, HandleRegistry};

/// Asset whose liveness can be flipped from the outside
#[derive(Debug)]
pub struct TestAsset {
    name: String,
    instantiable: bool,
    alive: AtomicBool,
    poisoned: AtomicBool,
}

impl TestAsset {
    /// Instantiable asset
    pub fn prefab(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            instantiable: true,
            alive: AtomicBool::new(true),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Non-instantiable asset
    pub fn texture(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            instantiable: false,
            alive: AtomicBool::new(true),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Simulate the engine destroying the object out-of-band
    pub fn kill(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Make every liveness check panic
    pub fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }
}

impl Asset for TestAsset {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_instantiable(&self) -> bool {
        self.instantiable
    }

    fn is_alive(&self) -> bool {
        if self.poisoned.load(Ordering::Acquire) {
            panic!("liveness check on {} blew up", self.name);
        }
        self.alive.load(Ordering::Acquire)
    }
}

/// A second asset type, for type-mismatch tests
#[derive(Debug)]
pub struct OtherAsset;

impl Asset for OtherAsset {
    fn name(&self) -> &str {
        "other"
    }
}

enum Entry {
    Scalar(Resource),
    Array(Vec<Resource>),
    Failure(String),
}

/// Loader over a path table that counts every call
#[derive(Default)]
pub struct RecordingLoader {
    entries: Mutex<HashMap<String, Entry>>,
    latency: Duration,
    loads: AtomicUsize,
    releases: AtomicUsize,
    array_releases: AtomicUsize,
    reclaims: AtomicUsize,
    cleared: Mutex<Vec<String>>,
    fail_clears: AtomicBool,
    panic_releases: AtomicBool,
}

impl RecordingLoader {
    /// Loader answering immediately
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader that sleeps `latency` before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Serve `asset` for `path`
    pub fn insert(&self, path: &str, asset: Arc<TestAsset>) -> Arc<TestAsset> {
        let resource: Resource = asset.clone();
        self.entries.lock().insert(path.to_string(), Entry::Scalar(resource));
        asset
    }

    /// Serve `assets` as a batch for `path`
    pub fn insert_array(&self, path: &str, assets: Vec<Arc<TestAsset>>) -> Vec<Arc<TestAsset>> {
        let resources = assets.iter().map(|a| a.clone() as Resource).collect();
        self.entries.lock().insert(path.to_string(), Entry::Array(resources));
        assets
    }

    /// Fail every load of `path`
    pub fn insert_failure(&self, path: &str, message: &str) {
        self.entries
            .lock()
            .insert(path.to_string(), Entry::Failure(message.to_string()));
    }

    /// Make every dependency-cache clear fail
    pub fn fail_dependency_clears(&self) {
        self.fail_clears.store(true, Ordering::Relaxed);
    }

    /// Make every scalar release panic
    pub fn panic_on_release(&self) {
        self.panic_releases.store(true, Ordering::Relaxed);
    }

    /// Number of load / load_array calls
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of scalar releases
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::Relaxed)
    }

    /// Number of batch releases
    pub fn array_releases(&self) -> usize {
        self.array_releases.load(Ordering::Relaxed)
    }

    /// Number of reclaim hints
    pub fn reclaims(&self) -> usize {
        self.reclaims.load(Ordering::Relaxed)
    }

    /// Names whose dependency cache was cleared
    pub fn cleared(&self) -> Vec<String> {
        self.cleared.lock().clone()
    }

    async fn lookup(&self, path: &str) -> std::result::Result<Entry, BoxError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match self.entries.lock().get(path) {
            Some(Entry::Scalar(r)) => Ok(Entry::Scalar(Arc::clone(r))),
            Some(Entry::Array(items)) => Ok(Entry::Array(items.clone())),
            Some(Entry::Failure(message)) => Err(message.clone().into()),
            None => Err(format!("no asset at {}", path).into()),
        }
    }
}

#[async_trait]
impl AssetLoader for RecordingLoader {
    async fn load(&self, path: &str) -> std::result::Result<Resource, BoxError> {
        match self.lookup(path).await? {
            Entry::Scalar(resource) => Ok(resource),
            Entry::Array(items) => items
                .into_iter()
                .next()
                .ok_or_else(|| format!("empty batch at {}", path).into()),
            Entry::Failure(message) => Err(message.into()),
        }
    }

    async fn load_array(&self, path: &str) -> std::result::Result<Vec<Resource>, BoxError> {
        match self.lookup(path).await? {
            Entry::Scalar(resource) => Ok(vec![resource]),
            Entry::Array(items) => Ok(items),
            Entry::Failure(message) => Err(message.into()),
        }
    }

    fn release(&self, resource: &Resource) {
        if self.panic_releases.load(Ordering::Relaxed) {
            panic!("engine refused to release {}", resource.name());
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
    }

    fn release_array(&self, _resources: &[Resource]) {
        self.array_releases.fetch_add(1, Ordering::Relaxed);
    }

    fn clear_dependency_cache(&self, name: &str) -> std::result::Result<(), BoxError> {
        if self.fail_clears.load(Ordering::Relaxed) {
            return Err(format!("dependency cache locked for {}", name).into());
        }
        self.cleared.lock().push(name.to_string());
        Ok(())
    }

    fn reclaim_unused(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
    }
}

/// Instantiator that records spawned and destroyed instances
#[derive(Default)]
pub struct RecordingInstantiator {
    next_id: AtomicU64,
    names: Mutex<Vec<Option<String>>>,
    live: Mutex<Vec<InstanceId>>,
    released: Mutex<Vec<InstanceId>>,
    released_objects: Mutex<Vec<String>>,
}

impl RecordingInstantiator {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of spawned instances
    pub fn spawned(&self) -> usize {
        self.names.lock().len()
    }

    /// Display names given at spawn time
    pub fn names(&self) -> Vec<Option<String>> {
        self.names.lock().clone()
    }

    /// Instances spawned and not destroyed yet
    pub fn live(&self) -> Vec<InstanceId> {
        self.live.lock().clone()
    }

    /// Destroyed instances, in order
    pub fn released(&self) -> Vec<InstanceId> {
        self.released.lock().clone()
    }

    /// Names of batch elements destroyed as scene objects
    pub fn released_objects(&self) -> Vec<String> {
        self.released_objects.lock().clone()
    }
}

impl Instantiator for RecordingInstantiator {
    fn instantiate(&self, _resource: &Resource, name: Option<&str>) -> InstanceId {
        self.names.lock().push(name.map(str::to_string));
        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.live.lock().push(id);
        id
    }

    fn release_instance(&self, instance: InstanceId) {
        self.live.lock().retain(|id| *id != instance);
        self.released.lock().push(instance);
    }

    fn release_object(&self, resource: &Resource) {
        self.released_objects.lock().push(resource.name().to_string());
    }
}

/// Flat registry for exercising handles without a cache
pub struct LocalRegistry {
    loader: Arc<RecordingLoader>,
    instantiator: Arc<RecordingInstantiator>,
    handles: Mutex<Vec<Arc<AssetHandle>>>,
}

impl LocalRegistry {
    /// Registry over an immediate loader
    pub fn new() -> Self {
        Self::with_loader(RecordingLoader::new())
    }

    /// Registry over a loader that sleeps before answering
    pub fn with_latency(latency: Duration) -> Self {
        Self::with_loader(RecordingLoader::with_latency(latency))
    }

    fn with_loader(loader: RecordingLoader) -> Self {
        Self {
            loader: Arc::new(loader),
            instantiator: Arc::new(RecordingInstantiator::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// The recording loader
    pub fn loader(&self) -> &RecordingLoader {
        &self.loader
    }

    /// The recording instantiator
    pub fn instantiator(&self) -> &RecordingInstantiator {
        &self.instantiator
    }

    /// Number of registered handles
    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Whether nothing has been registered
    pub fn is_empty(&self) -> bool {
        self.handles.lock().is_empty()
    }

    /// Whether `handle` was registered here
    pub fn contains(&self, handle: &Arc<AssetHandle>) -> bool {
        self.handles.lock().iter().any(|h| AssetHandle::same(h, handle))
    }
}

impl Default for LocalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry for LocalRegistry {
    fn backend(&self) -> Backend {
        Backend::new(self.loader.clone(), self.instantiator.clone())
    }

    fn register(&self, handle: Arc<AssetHandle>) -> Result<()> {
        self.handles.lock().push(handle);
        Ok(())
    }
}
