//! AssetHandle: one cached load and its lifecycle
//!
//! State machine:
//! - `Idle -> Loading` when a load claims the handle
//! - `Loading -> Setup` on success, `Loading -> Idle` on failure
//! - `Setup -> Instantiated` for instantiable scalar assets
//! - `Setup | Instantiated -> Released` on release
//! - `Released -> Loading` when the handle is reused for a fresh load

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::asset::{downcast, type_name, Asset, Backend, InstanceId, Resource};
use crate::classify::{Category, Group, ScopeId};
use crate::error::{Error, Result};

/// Something handles register themselves into on construction
pub trait HandleRegistry {
    /// Backend every handle of this registry loads through
    fn backend(&self) -> Backend;

    /// Index a freshly constructed handle
    fn register(&self, handle: Arc<AssetHandle>) -> Result<()>;
}

/// Observable lifecycle state of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    /// Never loaded
    Idle,
    /// A load is in flight
    Loading,
    /// Loaded and ready
    Setup,
    /// Loaded and spawned into the scene
    Instantiated,
    /// Released; may be loaded again
    Released,
}

impl HandleStatus {
    /// Lowercase name used in messages
    pub fn as_str(&self) -> &'static str {
        match self {
            HandleStatus::Idle => "idle",
            HandleStatus::Loading => "loading",
            HandleStatus::Setup => "setup",
            HandleStatus::Instantiated => "instantiated",
            HandleStatus::Released => "released",
        }
    }
}

enum Payload {
    Scalar(Resource),
    Array(Vec<Resource>),
}

impl Payload {
    fn scalar(&self) -> Option<&Resource> {
        match self {
            Payload::Scalar(resource) => Some(resource),
            Payload::Array(items) => items.first(),
        }
    }

    fn items(&self) -> Vec<Resource> {
        match self {
            Payload::Scalar(resource) => vec![Arc::clone(resource)],
            Payload::Array(items) => items.clone(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Payload::Scalar(_) => 1,
            Payload::Array(items) => items.len(),
        }
    }
}

enum State {
    Idle,
    Loading,
    Setup(Payload),
    Instantiated {
        resource: Resource,
        instance: InstanceId,
    },
    Released,
}

/// What a release has to hand back to the backend
enum Teardown {
    Scalar {
        resource: Resource,
        instance: Option<InstanceId>,
    },
    Array(Vec<Resource>),
}

impl State {
    fn status(&self) -> HandleStatus {
        match self {
            State::Idle => HandleStatus::Idle,
            State::Loading => HandleStatus::Loading,
            State::Setup(_) => HandleStatus::Setup,
            State::Instantiated { .. } => HandleStatus::Instantiated,
            State::Released => HandleStatus::Released,
        }
    }

    fn payload_scalar(&self) -> Option<&Resource> {
        match self {
            State::Setup(payload) => payload.scalar(),
            State::Instantiated { resource, .. } => Some(resource),
            _ => None,
        }
    }

    /// Claim the in-flight slot. Only idle or released handles can load.
    fn begin_load(&mut self) -> std::result::Result<(), HandleStatus> {
        match self {
            State::Idle | State::Released => {
                *self = State::Loading;
                Ok(())
            }
            other => Err(other.status()),
        }
    }

    fn finish_load(&mut self, payload: Payload) {
        debug_assert!(matches!(self, State::Loading));
        *self = State::Setup(payload);
    }

    fn rollback(&mut self) {
        if matches!(self, State::Loading) {
            *self = State::Idle;
        }
    }

    fn take_for_release(&mut self) -> Option<Teardown> {
        let teardown = match std::mem::replace(self, State::Released) {
            State::Setup(Payload::Scalar(resource)) => Teardown::Scalar {
                resource,
                instance: None,
            },
            State::Setup(Payload::Array(items)) => Teardown::Array(items),
            State::Instantiated { resource, instance } => Teardown::Scalar {
                resource,
                instance: Some(instance),
            },
            previous => {
                *self = previous;
                return None;
            }
        };
        Some(teardown)
    }
}

/// Rolls a claimed handle back to `Idle` unless the load completed.
///
/// Covers loader panics and callers dropping the load future mid-flight.
struct LoadGuard<'a> {
    state: &'a Mutex<State>,
    armed: bool,
}

impl<'a> LoadGuard<'a> {
    fn new(state: &'a Mutex<State>) -> Self {
        Self { state, armed: true }
    }

    fn complete(mut self, payload: Payload) {
        self.armed = false;
        self.state.lock().finish_load(payload);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().rollback();
        }
    }
}

/// A single cached load (scalar or array) with its status and release behavior.
///
/// Handles compare by identity: two handles are the same only if they are
/// the same allocation (see [`AssetHandle::same`]).
pub struct AssetHandle {
    group: Group,
    category: Category,
    scope: Option<ScopeId>,
    backend: Backend,
    state: Mutex<State>,
    auto_release: AtomicBool,
    used: AtomicBool,
    instantiating: AtomicBool,
}

impl AssetHandle {
    /// Construct a handle and register it into `registry`.
    ///
    /// # Arguments
    /// * `registry` - Cache the handle is indexed by
    /// * `group` / `category` - Bucket the handle lives in
    /// * `scope` - Optional lifecycle scope that force-releases the handle when it ends
    pub fn create<R>(
        registry: &R,
        group: Group,
        category: Category,
        scope: Option<ScopeId>,
    ) -> Result<Arc<Self>>
    where
        R: HandleRegistry + ?Sized,
    {
        let handle = Arc::new(Self {
            group,
            category,
            scope,
            backend: registry.backend(),
            state: Mutex::new(State::Idle),
            auto_release: AtomicBool::new(false),
            used: AtomicBool::new(false),
            instantiating: AtomicBool::new(false),
        });
        registry.register(Arc::clone(&handle))?;
        Ok(handle)
    }

    /// Group this handle is indexed under
    pub fn group(&self) -> Group {
        self.group
    }

    /// Category this handle is indexed under
    pub fn category(&self) -> Category {
        self.category
    }

    /// Scope this handle is linked to, if any
    pub fn scope(&self) -> Option<ScopeId> {
        self.scope
    }

    /// Identity comparison
    pub fn same(a: &Arc<AssetHandle>, b: &Arc<AssetHandle>) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// Current lifecycle state
    pub fn status(&self) -> HandleStatus {
        self.state.lock().status()
    }

    /// A load has been initiated and not rolled back
    pub fn is_loaded(&self) -> bool {
        matches!(
            self.status(),
            HandleStatus::Loading | HandleStatus::Setup | HandleStatus::Instantiated
        )
    }

    /// The load completed successfully
    pub fn is_setup(&self) -> bool {
        matches!(self.status(), HandleStatus::Setup | HandleStatus::Instantiated)
    }

    /// Loaded, set up, and ready to use
    pub fn is_loaded_and_setup(&self) -> bool {
        self.is_setup()
    }

    /// The handle holds an array load
    pub fn is_array(&self) -> bool {
        matches!(&*self.state.lock(), State::Setup(Payload::Array(_)))
    }

    /// The scalar asset has been spawned into the scene
    pub fn is_instantiated(&self) -> bool {
        self.status() == HandleStatus::Instantiated
    }

    /// The sweep may reclaim this handle
    pub fn is_auto_release(&self) -> bool {
        self.auto_release.load(Ordering::Acquire)
    }

    /// Opt into sweep-driven reclamation
    pub fn enable_auto_release(&self) {
        self.auto_release.store(true, Ordering::Release);
    }

    /// Informational "in use" flag
    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    /// Set the informational "in use" flag
    pub fn mark_as_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    /// Scalar view: the loaded asset, or the first element of an array load
    pub fn resource(&self) -> Option<Resource> {
        self.state.lock().payload_scalar().cloned()
    }

    /// Array view: every loaded asset (length 1 for scalar loads)
    pub fn resources(&self) -> Vec<Resource> {
        match &*self.state.lock() {
            State::Setup(payload) => payload.items(),
            State::Instantiated { resource, .. } => vec![Arc::clone(resource)],
            _ => Vec::new(),
        }
    }

    /// Number of assets in the array view
    pub fn array_count(&self) -> usize {
        match &*self.state.lock() {
            State::Setup(payload) => payload.len(),
            State::Instantiated { .. } => 1,
            _ => 0,
        }
    }

    /// Typed scalar view
    pub fn get<A: Asset>(&self) -> Option<Arc<A>> {
        self.resource().and_then(|resource| downcast::<A>(&resource))
    }

    /// The scalar view is present and the engine still holds it
    pub fn has_live_resource(&self) -> bool {
        self.state
            .lock()
            .payload_scalar()
            .is_some_and(|resource| resource.is_alive())
    }

    /// Eligible for sweep eviction: auto-releasable, set up, and its
    /// resource reference has been cleared by the engine
    pub fn is_stale(&self) -> bool {
        self.is_auto_release() && self.is_loaded_and_setup() && !self.has_live_resource()
    }

    fn claim(&self, path: &str) -> Result<LoadGuard<'_>> {
        let mut state = self.state.lock();
        if path.is_empty() {
            warn!("Cannot load: invalid path for {}/{} handle", self.group, self.category);
            return Err(Error::InvalidLoad {
                path: path.to_string(),
                status: state.status().as_str(),
            });
        }
        if let Err(status) = state.begin_load() {
            warn!("Cannot load '{}': handle is already {}", path, status.as_str());
            return Err(Error::InvalidLoad {
                path: path.to_string(),
                status: status.as_str(),
            });
        }
        drop(state);
        Ok(LoadGuard::new(&self.state))
    }

    /// Load a single asset of type `A`.
    ///
    /// The handle must be idle or released and `path` non-empty; otherwise
    /// this fails with [`Error::InvalidLoad`] without touching the loader.
    /// A loader failure rolls the handle back to idle so the load can be retried.
    pub async fn try_load<A: Asset>(&self, path: &str) -> Result<Arc<A>> {
        let guard = self.claim(path)?;
        let loader = self.backend.loader();

        let resource = match loader.load(path).await {
            Ok(resource) => resource,
            Err(source) => {
                error!("Failed to load asset at {}: {}", path, source);
                return Err(Error::Load {
                    path: path.to_string(),
                    source,
                });
            }
        };

        let Some(typed) = downcast::<A>(&resource) else {
            error!("Asset at {} is not a {}", path, type_name::<A>());
            loader.release(&resource);
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: type_name::<A>(),
            });
        };

        guard.complete(Payload::Scalar(resource));
        debug!("Loaded {} into {}/{}", path, self.group, self.category);
        Ok(typed)
    }

    /// Load every asset under `path` as type `A`.
    ///
    /// Same preconditions and rollback as [`try_load`](Self::try_load). The
    /// scalar view becomes the first element, or stays empty for an empty batch.
    pub async fn try_load_array<A: Asset>(&self, path: &str) -> Result<Vec<Arc<A>>> {
        let guard = self.claim(path)?;
        let loader = self.backend.loader();

        let items = match loader.load_array(path).await {
            Ok(items) => items,
            Err(source) => {
                error!("Failed to load array at {}: {}", path, source);
                return Err(Error::Load {
                    path: path.to_string(),
                    source,
                });
            }
        };

        let typed: Option<Vec<Arc<A>>> = items.iter().map(downcast::<A>).collect();
        let Some(typed) = typed else {
            error!("Array at {} is not made of {}", path, type_name::<A>());
            loader.release_array(&items);
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                expected: type_name::<A>(),
            });
        };

        let count = items.len();
        guard.complete(Payload::Array(items));
        debug!("Loaded {} assets from {} into {}/{}", count, path, self.group, self.category);
        Ok(typed)
    }

    /// Callback form of [`try_load`](Self::try_load).
    ///
    /// `on_success` runs after the handle reports setup; `on_failure`
    /// receives precondition and loader errors alike.
    pub async fn load<A, S, F>(&self, path: &str, on_success: S, on_failure: F)
    where
        A: Asset,
        S: FnOnce(Arc<A>),
        F: FnOnce(Error),
    {
        match self.try_load::<A>(path).await {
            Ok(asset) => on_success(asset),
            Err(e) => on_failure(e),
        }
    }

    /// Callback form of [`try_load_array`](Self::try_load_array)
    pub async fn load_array<A, S, F>(&self, path: &str, on_success: S, on_failure: F)
    where
        A: Asset,
        S: FnOnce(Vec<Arc<A>>),
        F: FnOnce(Error),
    {
        match self.try_load_array::<A>(path).await {
            Ok(assets) => on_success(assets),
            Err(e) => on_failure(e),
        }
    }

    /// Spawn the loaded scalar asset into the scene.
    ///
    /// Returns `None` (with a warning) unless the handle is set up with an
    /// instantiable scalar asset that has not been instantiated yet.
    /// Instantiating enables auto-release. The instantiator runs without
    /// the handle's lock held.
    pub fn instantiate(&self, name: Option<&str>) -> Option<InstanceId> {
        let resource = {
            let state = self.state.lock();
            match &*state {
                State::Setup(Payload::Scalar(resource))
                    if resource.is_instantiable()
                        && !self.instantiating.swap(true, Ordering::AcqRel) =>
                {
                    Arc::clone(resource)
                }
                other => {
                    warn!(
                        "Cannot instantiate: asset not loaded, not instantiable, or already instantiated ({})",
                        other.status().as_str()
                    );
                    return None;
                }
            }
        };

        let instance = self
            .backend
            .instantiator()
            .instantiate(&resource, name.filter(|n| !n.is_empty()));

        let mut state = self.state.lock();
        let claimed = matches!(
            &*state,
            State::Setup(Payload::Scalar(current)) if Arc::ptr_eq(current, &resource)
        );
        if claimed {
            *state = State::Instantiated { resource, instance };
        }
        drop(state);
        self.instantiating.store(false, Ordering::Release);

        if !claimed {
            warn!("Handle was released while instantiating; destroying {}", instance);
            self.backend.instantiator().release_instance(instance);
            return None;
        }
        self.enable_auto_release();
        Some(instance)
    }

    /// Release the loaded asset(s) back to the backend.
    ///
    /// No-op unless the handle is set up; returns whether anything was
    /// released. Secondary cleanup failures are logged, never returned.
    pub fn release(&self) -> bool {
        let Some(teardown) = self.state.lock().take_for_release() else {
            return false;
        };

        let backend = &self.backend;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let name = match &teardown {
                Teardown::Scalar { resource, instance } => {
                    if let Some(instance) = instance {
                        backend.instantiator().release_instance(*instance);
                    }
                    backend.loader().release(resource);
                    Some(resource.name().to_string())
                }
                Teardown::Array(items) => {
                    for item in items.iter().filter(|item| item.is_instantiable()) {
                        backend.instantiator().release_object(item);
                    }
                    backend.loader().release_array(items);
                    items.first().map(|first| first.name().to_string())
                }
            };

            if let Some(name) = name {
                if let Err(e) = backend.loader().clear_dependency_cache(&name) {
                    warn!("Failed to clear dependency cache for {}: {}", name, e);
                }
            }
        }));
        if outcome.is_err() {
            error!("Backend panicked while releasing {}/{} handle", self.group, self.category);
        }

        backend.loader().reclaim_unused();
        true
    }
}

impl fmt::Debug for AssetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetHandle")
            .field("group", &self.group)
            .field("category", &self.category)
            .field("scope", &self.scope)
            .field("status", &self.status())
            .field("auto_release", &self.is_auto_release())
            .finish()
    }
}
