//! LazyAsset: a standalone, lazily loaded asset reference
//!
//! Unlike [`AssetHandle`](assetkeep::AssetHandle), a lazy asset is not
//! indexed by the grouped cache and is never swept; its owner releases it.

use std::marker::PhantomData;
use std::sync::Arc;

use assetkeep::{downcast, Asset, Backend, InstanceId, Resource};
use parking_lot::Mutex;
use tracing::{error, warn};

struct Slot {
    loading: bool,
    resource: Option<Resource>,
    instances: Vec<InstanceId>,
}

/// Clears the loading flag however the load ends
struct LoadingFlag<'a>(&'a Mutex<Slot>);

impl Drop for LoadingFlag<'_> {
    fn drop(&mut self) {
        self.0.lock().loading = false;
    }
}

/// Asset loaded on first use and cached until released
pub struct LazyAsset<A: Asset> {
    path: String,
    backend: Backend,
    slot: Mutex<Slot>,
    _asset: PhantomData<fn() -> A>,
}

impl<A: Asset> LazyAsset<A> {
    /// Reference to the asset at `path`, not loaded yet
    pub fn new(path: impl Into<String>, backend: Backend) -> Self {
        Self {
            path: path.into(),
            backend,
            slot: Mutex::new(Slot {
                loading: false,
                resource: None,
                instances: Vec::new(),
            }),
            _asset: PhantomData,
        }
    }

    /// Path this reference loads from
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Loaded and ready
    pub fn is_setup(&self) -> bool {
        self.slot.lock().resource.is_some()
    }

    /// The loaded asset, if any
    pub fn get(&self) -> Option<Arc<A>> {
        self.slot.lock().resource.as_ref().and_then(downcast::<A>)
    }

    /// Load the asset unless it is already loaded or loading
    pub async fn load(&self) -> Option<Arc<A>> {
        self.load_with(|_| {}).await
    }

    /// Load the asset and run `action` on success.
    ///
    /// Returns the cached asset when already set up, and `None` while
    /// another load is in flight or when the path is empty.
    pub async fn load_with<F>(&self, action: F) -> Option<Arc<A>>
    where
        F: FnOnce(&Arc<A>),
    {
        {
            let mut slot = self.slot.lock();
            if slot.loading || slot.resource.is_some() || self.path.is_empty() {
                return slot.resource.as_ref().and_then(downcast::<A>);
            }
            slot.loading = true;
        }
        let _flag = LoadingFlag(&self.slot);

        let resource = match self.backend.loader().load(&self.path).await {
            Ok(resource) => resource,
            Err(e) => {
                error!("Failed to load asset at {}: {}", self.path, e);
                return None;
            }
        };
        let Some(asset) = downcast::<A>(&resource) else {
            error!("Asset at {} has an unexpected type", self.path);
            self.backend.loader().release(&resource);
            return None;
        };

        self.slot.lock().resource = Some(resource);
        action(&asset);
        Some(asset)
    }

    /// Spawn the asset into the scene; `None` unless loaded and instantiable
    pub fn instantiate(&self, name: Option<&str>) -> Option<InstanceId> {
        let resource = self.slot.lock().resource.clone().filter(|r| r.is_instantiable());
        let Some(resource) = resource else {
            warn!("Cannot instantiate {}: not loaded or not instantiable", self.path);
            return None;
        };

        let instance = self.backend.instantiator().instantiate(&resource, name);
        let mut slot = self.slot.lock();
        if !slot.resource.as_ref().is_some_and(|r| Arc::ptr_eq(r, &resource)) {
            drop(slot);
            warn!("{} was released while instantiating", self.path);
            self.backend.instantiator().release_instance(instance);
            return None;
        }
        slot.instances.push(instance);
        Some(instance)
    }

    /// Instances spawned from this asset and not released yet
    pub fn instances(&self) -> Vec<InstanceId> {
        self.slot.lock().instances.clone()
    }

    /// Release the asset; no-op unless loaded
    pub fn release(&self) -> bool {
        let (resource, instances) = {
            let mut slot = self.slot.lock();
            let Some(resource) = slot.resource.take() else {
                return false;
            };
            (resource, std::mem::take(&mut slot.instances))
        };

        for instance in instances {
            self.backend.instantiator().release_instance(instance);
        }
        self.backend.loader().release(&resource);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetkeep::testing::{LocalRegistry, OtherAsset, TestAsset};
    use assetkeep::HandleRegistry;
    use std::time::Duration;

    #[tokio::test]
    async fn test_load_once() {
        let registry = LocalRegistry::new();
        registry.loader().insert("logo", TestAsset::texture("logo"));
        let lazy = LazyAsset::<TestAsset>::new("logo", registry.backend());

        let mut calls = 0;
        let first = lazy.load_with(|_| calls += 1).await;
        let second = lazy.load_with(|_| calls += 1).await;

        assert!(first.is_some());
        assert!(Arc::ptr_eq(&first.unwrap(), &second.unwrap()));
        assert_eq!(calls, 1);
        assert_eq!(registry.loader().loads(), 1);
        assert!(lazy.is_setup());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_load_returns_none() {
        let registry = LocalRegistry::with_latency(Duration::from_millis(20));
        registry.loader().insert("logo", TestAsset::texture("logo"));
        let lazy = LazyAsset::<TestAsset>::new("logo", registry.backend());

        let (first, second) = tokio::join!(lazy.load(), lazy.load());

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(registry.loader().loads(), 1);
    }

    #[tokio::test]
    async fn test_failed_load_can_retry() {
        let registry = LocalRegistry::new();
        let lazy = LazyAsset::<TestAsset>::new("later", registry.backend());

        assert!(lazy.load().await.is_none());
        registry.loader().insert("later", TestAsset::texture("later"));
        assert!(lazy.load().await.is_some());
    }

    #[tokio::test]
    async fn test_wrong_type_is_released() {
        let registry = LocalRegistry::new();
        registry.loader().insert("logo", TestAsset::texture("logo"));
        let lazy = LazyAsset::<OtherAsset>::new("logo", registry.backend());

        assert!(lazy.load().await.is_none());
        assert_eq!(registry.loader().releases(), 1);
        assert!(!lazy.is_setup());
    }

    #[tokio::test]
    async fn test_instantiate_and_release() {
        let registry = LocalRegistry::new();
        registry.loader().insert("hero", TestAsset::prefab("hero"));
        let lazy = LazyAsset::<TestAsset>::new("hero", registry.backend());

        assert!(lazy.instantiate(None).is_none());
        lazy.load().await.unwrap();
        let first = lazy.instantiate(Some("Hero")).unwrap();
        let second = lazy.instantiate(None).unwrap();
        assert_eq!(lazy.instances(), vec![first, second]);

        assert!(lazy.release());
        assert!(!lazy.release());
        assert_eq!(registry.instantiator().released(), vec![first, second]);
        assert!(lazy.instances().is_empty());
        assert_eq!(registry.loader().releases(), 1);
        assert!(lazy.get().is_none());
    }
}
