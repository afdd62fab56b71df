//! JSON manifest and the simulated backend it drives

use anyhow::{Context, Result};
use assetkeep::{downcast, Asset, AssetLoader, BoxError, InstanceId, Instantiator, Resource};
use async_trait::async_trait;
use keepcache::CacheConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Kind of a simulated asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    Prefab,
    Texture,
    Audio,
    Ui,
    Other,
}

/// One manifest entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSpec {
    pub path: String,
    pub kind: AssetKind,
    /// Batch size for array loads (absent = single asset)
    #[serde(default)]
    pub count: Option<usize>,
    /// Simulated load latency
    #[serde(default)]
    pub latency_ms: u64,
    /// Fail every load of this path with the given message
    #[serde(default)]
    pub fail: Option<String>,
}

/// Daemon manifest file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub assets: Vec<AssetSpec>,
}

impl Manifest {
    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest {:?}", path))?;
        let manifest: Manifest =
            serde_json::from_str(&content).context("Failed to parse manifest")?;
        info!("Loaded manifest with {} assets", manifest.assets.len());
        Ok(manifest)
    }
}

/// Loaded stand-in object
#[derive(Debug)]
pub struct StubAsset {
    path: String,
    name: String,
    kind: AssetKind,
    alive: AtomicBool,
}

impl StubAsset {
    pub fn kind(&self) -> AssetKind {
        self.kind
    }
}

impl Asset for StubAsset {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_instantiable(&self) -> bool {
        self.kind == AssetKind::Prefab
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Loader serving manifest entries from memory
pub struct ManifestLoader {
    specs: HashMap<String, AssetSpec>,
    live: Mutex<HashMap<String, Vec<Arc<StubAsset>>>>,
    reclaims: AtomicU64,
}

impl ManifestLoader {
    pub fn new(manifest: &Manifest) -> Self {
        Self {
            specs: manifest
                .assets
                .iter()
                .map(|spec| (spec.path.clone(), spec.clone()))
                .collect(),
            live: Mutex::new(HashMap::new()),
            reclaims: AtomicU64::new(0),
        }
    }

    async fn fetch(&self, path: &str) -> std::result::Result<Vec<Arc<StubAsset>>, BoxError> {
        let spec = self
            .specs
            .get(path)
            .ok_or_else(|| format!("no asset at '{}'", path))?;
        if spec.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(spec.latency_ms)).await;
        }
        if let Some(message) = &spec.fail {
            return Err(message.clone().into());
        }

        let objects: Vec<_> = match spec.count {
            None => vec![stub(path, path.to_string(), spec.kind)],
            Some(n) => (0..n)
                .map(|i| stub(path, format!("{}[{}]", path, i), spec.kind))
                .collect(),
        };
        self.live
            .lock()
            .entry(path.to_string())
            .or_default()
            .extend(objects.iter().cloned());
        Ok(objects)
    }

    /// Simulate the engine destroying every live object loaded from `path`
    pub fn unload(&self, path: &str) -> usize {
        let live = self.live.lock().remove(path).unwrap_or_default();
        for object in &live {
            object.alive.store(false, Ordering::Release);
        }
        live.len()
    }

    /// Objects currently loaded from `path`
    pub fn live_count(&self, path: &str) -> usize {
        self.live.lock().get(path).map(Vec::len).unwrap_or(0)
    }

    pub fn reclaims(&self) -> u64 {
        self.reclaims.load(Ordering::Relaxed)
    }

    fn forget(&self, resource: &Resource) {
        let Some(object) = downcast::<StubAsset>(resource) else {
            return;
        };
        let mut live = self.live.lock();
        if let Some(objects) = live.get_mut(&object.path) {
            objects.retain(|o| !Arc::ptr_eq(o, &object));
            if objects.is_empty() {
                live.remove(&object.path);
            }
        }
    }
}

fn stub(path: &str, name: String, kind: AssetKind) -> Arc<StubAsset> {
    Arc::new(StubAsset {
        path: path.to_string(),
        name,
        kind,
        alive: AtomicBool::new(true),
    })
}

#[async_trait]
impl AssetLoader for ManifestLoader {
    async fn load(&self, path: &str) -> std::result::Result<Resource, BoxError> {
        let mut objects = self.fetch(path).await?.into_iter();
        let first = objects.next().ok_or_else(|| format!("'{}' is empty", path))?;
        for extra in objects {
            self.forget(&(extra as Resource));
        }
        Ok(first as Resource)
    }

    async fn load_array(&self, path: &str) -> std::result::Result<Vec<Resource>, BoxError> {
        let objects = self.fetch(path).await?;
        Ok(objects.into_iter().map(|o| o as Resource).collect())
    }

    fn release(&self, resource: &Resource) {
        debug!("Releasing {}", resource.name());
        self.forget(resource);
    }

    fn release_array(&self, resources: &[Resource]) {
        debug!("Releasing batch of {}", resources.len());
        for resource in resources {
            self.forget(resource);
        }
    }

    fn clear_dependency_cache(&self, name: &str) -> std::result::Result<(), BoxError> {
        debug!("Cleared dependency cache for {}", name);
        Ok(())
    }

    fn reclaim_unused(&self) {
        self.reclaims.fetch_add(1, Ordering::Relaxed);
    }
}

/// Live scene instances
#[derive(Default)]
pub struct SceneGraph {
    next_id: AtomicU64,
    instances: Mutex<Vec<(InstanceId, String)>>,
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.lock().is_empty()
    }
}

impl Instantiator for SceneGraph {
    fn instantiate(&self, resource: &Resource, name: Option<&str>) -> InstanceId {
        let id = InstanceId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let label = name.unwrap_or(resource.name()).to_string();
        debug!("Spawned {} as {}", label, id);
        self.instances.lock().push((id, label));
        id
    }

    fn release_instance(&self, instance: InstanceId) {
        self.instances.lock().retain(|(id, _)| *id != instance);
    }
}
