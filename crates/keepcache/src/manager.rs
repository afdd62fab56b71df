//! CacheManager: owns the indexes and drives sweeping and scope teardown

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use assetkeep::{
    Asset, AssetHandle, Backend, Category, Error, Group, HandleRegistry, Result, ScopeId,
};
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle as Runtime;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::CacheConfig;
use crate::grouped::GroupedCache;
use crate::lazy::LazyAsset;
use crate::scope::{ScopeEvents, ScopeIndex};
use crate::stats::{CacheSnapshot, CacheStats};

/// Both indexes, mutated together under one lock
#[derive(Default)]
struct Registry {
    cache: GroupedCache,
    scopes: ScopeIndex,
}

impl Registry {
    fn forget(&mut self, handles: &[Arc<AssetHandle>]) {
        for handle in handles {
            self.scopes.remove_handle(handle);
        }
    }
}

/// State reachable from background tasks
struct Shared {
    registry: RwLock<Registry>,
    backend: Backend,
    config: CacheConfig,
    stats: CacheStats,
    closed: AtomicBool,
}

impl Shared {
    fn sweep(&self) -> usize {
        let evicted = {
            let mut registry = self.registry.write();
            let evicted = registry.cache.auto_release();
            registry.forget(&evicted);
            evicted
        };
        self.stats.record_sweep(evicted.len());
        if !evicted.is_empty() {
            debug!("Sweep evicted {} handles", evicted.len());
        }
        evicted.len()
    }

    fn end_scope(&self, scope: ScopeId) -> usize {
        let mut registry = self.registry.write();
        let handles = registry.scopes.take_scope(scope);
        for handle in &handles {
            handle.release();
            registry.cache.remove_handle(handle);
        }
        drop(registry);

        self.stats.record_scope_teardown();
        if !handles.is_empty() {
            info!("Released {} handles of {}", handles.len(), scope);
        }
        handles.len()
    }

    fn snapshot(&self) -> CacheSnapshot {
        self.registry.read().cache.snapshot()
    }
}

/// Periodic sweep loop; exits when `cancel` flips or its sender goes away
async fn run_sweep(shared: Arc<Shared>, mut cancel: watch::Receiver<bool>) {
    let interval = shared.config.sweep_interval();
    debug!("Sweep task started ({:?} interval)", interval);

    while !*cancel.borrow() {
        let tick = panic::catch_unwind(AssertUnwindSafe(|| {
            shared.sweep();
            if shared.config.log_stats {
                debug!("{}", shared.snapshot());
            }
        }));
        if tick.is_err() {
            error!("Sweep tick panicked; continuing");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.changed() => break,
        }
    }

    debug!("Sweep task stopped");
}

/// Background task bookkeeping
struct Tasks {
    cancel: watch::Sender<bool>,
    sweep: Option<JoinHandle<()>>,
    listener: Option<JoinHandle<()>>,
}

impl Tasks {
    fn new() -> Self {
        Self {
            cancel: watch::channel(false).0,
            sweep: None,
            listener: None,
        }
    }

    fn cancel_sweep(&mut self) -> bool {
        self.cancel.send_replace(true);
        // Fresh source so the sweep can be restarted later
        self.cancel = watch::channel(false).0;
        self.sweep.take().is_some()
    }

    fn unsubscribe(&mut self) -> bool {
        match self.listener.take() {
            Some(listener) => {
                listener.abort();
                true
            }
            None => false,
        }
    }
}

/// Orchestrates one grouped cache, one scope index, the periodic sweep,
/// and the scope-ended subscription.
///
/// The application root owns one manager and passes it by reference to
/// whatever creates handles. Dropping the manager stops its background
/// tasks; [`teardown`](Self::teardown) additionally closes it to new
/// registrations and asks the loader to reclaim unused resources.
pub struct CacheManager {
    shared: Arc<Shared>,
    tasks: Mutex<Tasks>,
}

impl CacheManager {
    /// Create a manager over `backend`. Background tasks are not started.
    pub fn new(backend: Backend, config: CacheConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: RwLock::new(Registry::default()),
                backend,
                config,
                stats: CacheStats::new(),
                closed: AtomicBool::new(false),
            }),
            tasks: Mutex::new(Tasks::new()),
        }
    }

    /// Start the sweep and subscribe to `events`
    pub fn start(&self, events: &ScopeEvents) -> Result<()> {
        self.start_auto_release()?;
        self.subscribe(events)
    }

    /// Configuration in effect
    pub fn config(&self) -> &CacheConfig {
        &self.shared.config
    }

    /// Lifetime counters
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }

    /// Whether [`teardown`](Self::teardown) has run
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Construct a handle registered into this manager
    pub fn create_handle(
        &self,
        group: Group,
        category: Category,
        scope: Option<ScopeId>,
    ) -> Result<Arc<AssetHandle>> {
        AssetHandle::create(self, group, category, scope)
    }

    /// Index `handle` under its group and category, and under its scope if linked
    pub fn register_handle(&self, handle: Arc<AssetHandle>) -> Result<()> {
        self.ensure_open()?;
        let (group, category) = (handle.group(), handle.category());

        let mut registry = self.shared.registry.write();
        if let Some(scope) = handle.scope() {
            registry.scopes.insert(scope, group, Arc::clone(&handle));
        }
        registry.cache.add(group, category, handle);
        drop(registry);

        self.shared.stats.record_registration();
        Ok(())
    }

    /// Total number of handles
    pub fn count(&self) -> usize {
        self.shared.registry.read().cache.len()
    }

    /// Number of handles in `group`
    pub fn group_count(&self, group: Group) -> usize {
        self.shared.registry.read().cache.group_count(group)
    }

    /// Number of handles in the (group, category) bucket
    pub fn category_count(&self, group: Group, category: Category) -> usize {
        self.shared.registry.read().cache.category_count(group, category)
    }

    /// Number of handles linked to `scope`
    pub fn scope_count(&self, scope: ScopeId) -> usize {
        self.shared.registry.read().scopes.handle_count(scope)
    }

    /// Handle at `index` of the bucket
    pub fn find(&self, group: Group, category: Category, index: usize) -> Option<Arc<AssetHandle>> {
        self.shared.registry.read().cache.find(group, category, index)
    }

    /// Indexed handle identical to `handle`
    pub fn find_handle(&self, handle: &Arc<AssetHandle>) -> Option<Arc<AssetHandle>> {
        self.shared.registry.read().cache.find_handle(handle)
    }

    /// Force-release a whole group; returns how many handles were dropped
    pub fn release_group(&self, group: Group) -> usize {
        let released = {
            let mut registry = self.shared.registry.write();
            let released = registry.cache.release_group(group);
            registry.forget(&released);
            released
        };
        self.shared.stats.record_forced_release(released.len());
        self.shared.backend.loader().reclaim_unused();
        released.len()
    }

    /// Force-release one bucket; returns how many handles were dropped
    pub fn release_category(&self, group: Group, category: Category) -> usize {
        let released = {
            let mut registry = self.shared.registry.write();
            let released = registry.cache.release_category(group, category);
            registry.forget(&released);
            released
        };
        self.shared.stats.record_forced_release(released.len());
        self.shared.backend.loader().reclaim_unused();
        released.len()
    }

    /// Force-release and forget every handle linked to `scope`
    pub fn end_scope(&self, scope: ScopeId) -> usize {
        self.shared.end_scope(scope)
    }

    /// Run one sweep pass now; returns how many handles were evicted
    pub fn sweep(&self) -> usize {
        self.shared.sweep()
    }

    /// Point-in-time per-group counts
    pub fn snapshot(&self) -> CacheSnapshot {
        self.shared.snapshot()
    }

    /// Human-readable stats report
    pub fn stats_report(&self) -> String {
        self.snapshot().to_string()
    }

    /// Start the periodic sweep; no-op if it is already running
    pub fn start_auto_release(&self) -> Result<()> {
        self.ensure_open()?;
        let runtime = Runtime::try_current().map_err(|_| Error::NoRuntime)?;

        let mut tasks = self.tasks.lock();
        if tasks.sweep.as_ref().is_some_and(|task| !task.is_finished()) {
            return Ok(());
        }
        let cancel = tasks.cancel.subscribe();
        tasks.sweep = Some(runtime.spawn(run_sweep(Arc::clone(&self.shared), cancel)));
        Ok(())
    }

    /// Stop the periodic sweep; it can be started again afterwards
    pub fn cancel_auto_release(&self) -> bool {
        self.tasks.lock().cancel_sweep()
    }

    /// Whether the periodic sweep is running
    pub fn is_auto_release_running(&self) -> bool {
        self.tasks
            .lock()
            .sweep
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Release scoped handles whenever `events` announces a scope end.
    ///
    /// Replaces any previous subscription.
    pub fn subscribe(&self, events: &ScopeEvents) -> Result<()> {
        self.ensure_open()?;
        let runtime = Runtime::try_current().map_err(|_| Error::NoRuntime)?;
        let mut receiver = events.subscribe();
        let shared = Arc::clone(&self.shared);

        let listener = runtime.spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(scope) => {
                        shared.end_scope(scope);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Missed {} scope events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.unsubscribe();
        tasks.listener = Some(listener);
        Ok(())
    }

    /// Stop reacting to scope events
    pub fn unsubscribe(&self) -> bool {
        self.tasks.lock().unsubscribe()
    }

    /// Stop background work, refuse new registrations, and reclaim unused resources.
    ///
    /// In-flight loads are left to finish on their own. Idempotent.
    pub fn teardown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut tasks = self.tasks.lock();
            tasks.cancel_sweep();
            tasks.unsubscribe();
        }
        self.shared.backend.loader().reclaim_unused();
        info!("Cache manager torn down with {} handles indexed", self.count());
    }

    /// Lazily loaded asset reference sharing this manager's backend
    pub fn create_lazy<A: Asset>(&self, path: impl Into<String>) -> LazyAsset<A> {
        LazyAsset::new(path, self.shared.backend.clone())
    }

    /// Lazily loaded asset reference whose load starts right away in the background
    pub fn create_lazy_loaded<A, F>(&self, path: impl Into<String>, action: F) -> Result<Arc<LazyAsset<A>>>
    where
        A: Asset,
        F: FnOnce(&Arc<A>) + Send + 'static,
    {
        let runtime = Runtime::try_current().map_err(|_| Error::NoRuntime)?;
        let lazy = Arc::new(self.create_lazy::<A>(path));
        let task = Arc::clone(&lazy);
        runtime.spawn(async move {
            task.load_with(action).await;
        });
        Ok(lazy)
    }
}

impl HandleRegistry for CacheManager {
    fn backend(&self) -> Backend {
        self.shared.backend.clone()
    }

    fn register(&self, handle: Arc<AssetHandle>) -> Result<()> {
        self.register_handle(handle)
    }
}

impl Drop for CacheManager {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut();
        tasks.cancel_sweep();
        tasks.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetkeep::testing::{RecordingInstantiator, RecordingLoader, TestAsset};
    use assetkeep::HandleStatus;
    use std::time::Duration;

    struct Fixture {
        loader: Arc<RecordingLoader>,
        instantiator: Arc<RecordingInstantiator>,
        manager: CacheManager,
    }

    fn fixture() -> Fixture {
        let loader = Arc::new(RecordingLoader::new());
        let instantiator = Arc::new(RecordingInstantiator::new());
        let backend = Backend::new(loader.clone(), instantiator.clone());
        Fixture {
            loader,
            instantiator,
            manager: CacheManager::new(backend, CacheConfig::default()),
        }
    }

    #[test]
    fn test_register_indexes_handle() {
        let f = fixture();
        let h = f.manager.create_handle(Group::Game, Category::Prefab, None).unwrap();

        assert_eq!(f.manager.count(), 1);
        assert_eq!(f.manager.category_count(Group::Game, Category::Prefab), 1);
        assert!(AssetHandle::same(&f.manager.find(Group::Game, Category::Prefab, 0).unwrap(), &h));
        assert!(f.manager.find_handle(&h).is_some());
        assert_eq!(f.manager.stats().registrations(), 1);
    }

    #[test]
    fn test_scoped_handle_is_indexed_twice() {
        let f = fixture();
        f.manager
            .create_handle(Group::Game, Category::Prefab, Some(ScopeId(1)))
            .unwrap();
        f.manager.create_handle(Group::Game, Category::Prefab, None).unwrap();

        assert_eq!(f.manager.count(), 2);
        assert_eq!(f.manager.scope_count(ScopeId(1)), 1);
    }

    #[tokio::test]
    async fn test_scope_teardown_releases_and_unindexes() {
        let f = fixture();
        f.loader.insert("enemy", TestAsset::prefab("enemy"));
        let a = f.manager
            .create_handle(Group::Game, Category::Prefab, Some(ScopeId(1)))
            .unwrap();
        a.try_load::<TestAsset>("enemy").await.unwrap();

        assert_eq!(f.manager.end_scope(ScopeId(1)), 1);

        assert_eq!(a.status(), HandleStatus::Released);
        assert!(f.manager.find(Group::Game, Category::Prefab, 0).is_none());
        assert_eq!(f.manager.scope_count(ScopeId(1)), 0);
        assert_eq!(f.loader.releases(), 1);
    }

    #[tokio::test]
    async fn test_scope_teardown_tolerates_released_handles() {
        let f = fixture();
        f.loader.insert("a", TestAsset::texture("a"));
        let released = f.manager
            .create_handle(Group::Menu, Category::UI, Some(ScopeId(3)))
            .unwrap();
        let untouched = f.manager
            .create_handle(Group::Game, Category::UI, Some(ScopeId(3)))
            .unwrap();
        released.try_load::<TestAsset>("a").await.unwrap();
        released.release();

        assert_eq!(f.manager.end_scope(ScopeId(3)), 2);

        assert_eq!(f.loader.releases(), 1);
        assert_eq!(untouched.status(), HandleStatus::Idle);
        assert_eq!(f.manager.count(), 0);
        assert_eq!(f.manager.scope_count(ScopeId(3)), 0);
        assert_eq!(f.manager.end_scope(ScopeId(3)), 0);
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_auto_release() {
        let f = fixture();
        let cleared = f.loader.insert("a", TestAsset::texture("a"));
        let kept = f.loader.insert("b", TestAsset::texture("b"));
        let auto = f.manager.create_handle(Group::Menu, Category::UI, None).unwrap();
        let manual = f.manager.create_handle(Group::Menu, Category::UI, None).unwrap();
        auto.try_load::<TestAsset>("a").await.unwrap();
        manual.try_load::<TestAsset>("b").await.unwrap();
        auto.enable_auto_release();
        cleared.kill();
        kept.kill();

        assert_eq!(f.manager.sweep(), 1);

        assert_eq!(f.manager.category_count(Group::Menu, Category::UI), 1);
        assert!(AssetHandle::same(&f.manager.find(Group::Menu, Category::UI, 0).unwrap(), &manual));
        assert_eq!(f.manager.stats().evictions(), 1);
    }

    #[tokio::test]
    async fn test_sweep_unlinks_evicted_scoped_handles() {
        let f = fixture();
        let asset = f.loader.insert("hero", TestAsset::prefab("hero"));
        let h = f.manager
            .create_handle(Group::Game, Category::Prefab, Some(ScopeId(2)))
            .unwrap();
        h.try_load::<TestAsset>("hero").await.unwrap();
        let instance = h.instantiate(None).unwrap();
        asset.kill();

        assert_eq!(f.manager.sweep(), 1);

        assert_eq!(f.manager.scope_count(ScopeId(2)), 0);
        assert_eq!(f.manager.group_count(Group::Game), 0);
        assert!(!f.manager.stats_report().contains("Game"));
        assert_eq!(f.instantiator.released(), vec![instance]);
    }

    #[tokio::test]
    async fn test_sweep_survives_panicking_liveness_check() {
        let f = fixture();
        let stale = f.loader.insert("old", TestAsset::texture("old"));
        let broken = f.loader.insert("bad", TestAsset::texture("bad"));
        let scoped = f.manager
            .create_handle(Group::Menu, Category::UI, Some(ScopeId(1)))
            .unwrap();
        let keeper = f.manager
            .create_handle(Group::Game, Category::Texture, None)
            .unwrap();
        scoped.try_load::<TestAsset>("old").await.unwrap();
        keeper.try_load::<TestAsset>("bad").await.unwrap();
        scoped.enable_auto_release();
        keeper.enable_auto_release();
        stale.kill();
        broken.poison();

        assert_eq!(f.manager.sweep(), 1);

        assert_eq!(scoped.status(), HandleStatus::Released);
        assert_eq!(f.manager.scope_count(ScopeId(1)), 0);
        assert_eq!(f.manager.group_count(Group::Menu), 0);
        assert!(!f.manager.stats_report().contains("Menu"));
        assert!(f.manager.find_handle(&keeper).is_some());
        assert_eq!(keeper.status(), HandleStatus::Setup);
    }

    #[tokio::test]
    async fn test_release_group_and_category() {
        let f = fixture();
        f.manager.create_handle(Group::Title, Category::UI, None).unwrap();
        f.manager.create_handle(Group::Title, Category::Audio, None).unwrap();
        f.manager
            .create_handle(Group::Exit, Category::UI, Some(ScopeId(9)))
            .unwrap();

        assert_eq!(f.manager.release_category(Group::Title, Category::UI), 1);
        assert_eq!(f.manager.group_count(Group::Title), 1);
        assert_eq!(f.manager.release_group(Group::Exit), 1);
        assert_eq!(f.manager.scope_count(ScopeId(9)), 0);
        assert_eq!(f.manager.release_group(Group::Menu), 0);

        assert_eq!(f.manager.count(), 1);
        assert_eq!(f.manager.stats().forced_releases(), 2);
        assert_eq!(f.loader.reclaims(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep() {
        let f = fixture();
        let asset = f.loader.insert("a", TestAsset::texture("a"));
        let h = f.manager.create_handle(Group::Other, Category::Other, None).unwrap();
        h.try_load::<TestAsset>("a").await.unwrap();
        h.enable_auto_release();

        f.manager.start_auto_release().unwrap();
        assert!(f.manager.is_auto_release_running());
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(f.manager.count(), 1);

        asset.kill();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(f.manager.count(), 0);
        assert!(f.manager.stats().sweeps() >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_and_restart_sweep() {
        let f = fixture();
        f.manager.start_auto_release().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(f.manager.cancel_auto_release());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!f.manager.is_auto_release_running());
        let sweeps = f.manager.stats().sweeps();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(f.manager.stats().sweeps(), sweeps);

        f.manager.start_auto_release().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(f.manager.is_auto_release_running());
        assert_eq!(f.manager.stats().sweeps(), sweeps + 1);
    }

    #[tokio::test]
    async fn test_scope_events_drive_teardown() {
        let f = fixture();
        let events = ScopeEvents::new(8);
        f.manager.subscribe(&events).unwrap();
        let h = f.manager
            .create_handle(Group::Game, Category::Audio, Some(ScopeId(5)))
            .unwrap();

        assert_eq!(events.end_scope(ScopeId(5)), 1);
        for _ in 0..100 {
            if f.manager.count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert!(f.manager.find_handle(&h).is_none());
        assert_eq!(f.manager.stats().scope_teardowns(), 1);

        assert!(f.manager.unsubscribe());
        for _ in 0..100 {
            if events.subscriber_count() == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(events.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_closes_manager() {
        let f = fixture();
        let events = ScopeEvents::new(8);
        f.manager.start(&events).unwrap();

        f.manager.teardown();
        f.manager.teardown();

        assert!(f.manager.is_closed());
        assert!(!f.manager.is_auto_release_running());
        assert_eq!(f.loader.reclaims(), 1);
        assert!(matches!(
            f.manager.create_handle(Group::Game, Category::UI, None),
            Err(Error::Closed)
        ));
        assert!(matches!(f.manager.start_auto_release(), Err(Error::Closed)));
    }

    #[test]
    fn test_start_outside_runtime() {
        let f = fixture();
        assert!(matches!(f.manager.start_auto_release(), Err(Error::NoRuntime)));
    }

    #[tokio::test]
    async fn test_create_lazy_loaded() {
        let f = fixture();
        f.loader.insert("logo", TestAsset::texture("logo"));
        let (tx, rx) = tokio::sync::oneshot::channel();

        let lazy = f.manager
            .create_lazy_loaded::<TestAsset, _>("logo", move |asset| {
                let _ = tx.send(asset.name().to_string());
            })
            .unwrap();

        assert_eq!(rx.await.unwrap(), "logo");
        assert!(lazy.is_setup());
        assert_eq!(f.manager.count(), 0);
    }
}
