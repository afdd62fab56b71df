//! Optional process-wide accessor over one explicitly owned manager.
//!
//! Nothing here creates state on its own: the application installs its
//! manager at startup (or lazily through [`get_or_install_with`]) and calls
//! [`teardown`] on shutdown, which also clears the slot.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::manager::CacheManager;

static GLOBAL: RwLock<Option<Arc<CacheManager>>> = parking_lot::const_rwlock(None);

/// Install `manager` as the process-wide instance, returning the previous one
pub fn install(manager: Arc<CacheManager>) -> Option<Arc<CacheManager>> {
    GLOBAL.write().replace(manager)
}

/// The installed manager, if any
pub fn get() -> Option<Arc<CacheManager>> {
    GLOBAL.read().clone()
}

/// The installed manager, installing the one built by `init` on first access
pub fn get_or_install_with<F>(init: F) -> Arc<CacheManager>
where
    F: FnOnce() -> CacheManager,
{
    if let Some(manager) = get() {
        return manager;
    }
    let mut slot = GLOBAL.write();
    Arc::clone(slot.get_or_insert_with(|| Arc::new(init())))
}

/// Tear down and uninstall the process-wide manager
pub fn teardown() -> bool {
    let Some(manager) = GLOBAL.write().take() else {
        return false;
    };
    manager.teardown();
    true
}
