//! Resource model and the contracts of the external loading backend

use std::any::{self, Any};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::BoxError;

/// Type-erasure helper implemented for every `Send + Sync` type
pub trait AsAny: Any + Send + Sync {
    /// Convert a shared pointer into a downcastable one
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// Anything a loader can hand back.
///
/// Liveness is owned by the engine side: when the engine destroys the
/// underlying object out-of-band, `is_alive` must start returning `false`.
/// The sweep relies on that signal to reclaim stale handles.
pub trait Asset: AsAny {
    /// Name used to key the loader's dependency cache
    fn name(&self) -> &str;

    /// Whether the asset can be spawned into the scene
    fn is_instantiable(&self) -> bool {
        false
    }

    /// Whether the engine still holds the underlying object
    fn is_alive(&self) -> bool {
        true
    }
}

/// Type-erased loaded resource
pub type Resource = Arc<dyn Asset>;

/// Downcast a resource to its concrete type
pub fn downcast<A: Asset>(resource: &Resource) -> Option<Arc<A>> {
    Arc::clone(resource).into_any().downcast::<A>().ok()
}

pub(crate) fn type_name<A: Asset>() -> &'static str {
    any::type_name::<A>()
}

/// Identifier of a live scene instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Asynchronous resource loader.
///
/// The loader owns the actual transport; the cache only sequences and
/// indexes calls into it.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    /// Load a single resource
    async fn load(&self, path: &str) -> Result<Resource, BoxError>;

    /// Load every resource stored under `path`
    async fn load_array(&self, path: &str) -> Result<Vec<Resource>, BoxError>;

    /// Release a resource obtained from `load`
    fn release(&self, resource: &Resource);

    /// Release a batch obtained from `load_array`
    fn release_array(&self, resources: &[Resource]);

    /// Drop cached dependencies keyed by `name` (best effort)
    fn clear_dependency_cache(&self, name: &str) -> Result<(), BoxError>;

    /// Hint that unused resources may be reclaimed now
    fn reclaim_unused(&self);
}

/// Spawns loaded resources into the live scene
pub trait Instantiator: Send + Sync {
    /// Create one live instance of `resource`, optionally naming it
    fn instantiate(&self, resource: &Resource, name: Option<&str>) -> InstanceId;

    /// Destroy one instance returned by [`instantiate`](Self::instantiate)
    fn release_instance(&self, instance: InstanceId);

    /// Destroy an element of a released batch that lives in the scene
    /// itself. Called only for instantiable elements; no-op by default.
    fn release_object(&self, resource: &Resource) {
        let _ = resource;
    }
}

/// Loader and instantiator shared by every handle of a cache
#[derive(Clone)]
pub struct Backend {
    loader: Arc<dyn AssetLoader>,
    instantiator: Arc<dyn Instantiator>,
}

impl Backend {
    /// Bundle a loader with an instantiator
    pub fn new(loader: Arc<dyn AssetLoader>, instantiator: Arc<dyn Instantiator>) -> Self {
        Self {
            loader,
            instantiator,
        }
    }

    /// The resource loader
    pub fn loader(&self) -> &dyn AssetLoader {
        self.loader.as_ref()
    }

    /// The scene instantiator
    pub fn instantiator(&self) -> &dyn Instantiator {
        self.instantiator.as_ref()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}
