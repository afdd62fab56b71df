//! Scope-linked handles and scope-ended notifications

use std::collections::HashMap;
use std::sync::Arc;

use ahash::RandomState;
use assetkeep::{AssetHandle, Group, ScopeId};
use tokio::sync::broadcast;

type GroupMap = HashMap<Group, Vec<Arc<AssetHandle>>, RandomState>;

/// Secondary index: scope -> group -> handles created under that scope.
///
/// Non-owning with respect to lifecycle: every handle here is also in the
/// grouped cache, which stays the primary index.
#[derive(Default)]
pub struct ScopeIndex {
    scopes: HashMap<ScopeId, GroupMap, RandomState>,
}

impl ScopeIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` under `scope`
    pub fn insert(&mut self, scope: ScopeId, group: Group, handle: Arc<AssetHandle>) {
        self.scopes
            .entry(scope)
            .or_default()
            .entry(group)
            .or_default()
            .push(handle);
    }

    /// Remove a scope entirely, returning its handles in group order
    pub fn take_scope(&mut self, scope: ScopeId) -> Vec<Arc<AssetHandle>> {
        let Some(groups) = self.scopes.remove(&scope) else {
            return Vec::new();
        };
        let mut groups: Vec<_> = groups.into_iter().collect();
        groups.sort_by_key(|(group, _)| *group);
        groups.into_iter().flat_map(|(_, handles)| handles).collect()
    }

    /// Drop `handle` (by identity) from the scope it was linked to
    pub fn remove_handle(&mut self, handle: &Arc<AssetHandle>) -> bool {
        let Some(scope) = handle.scope() else {
            return false;
        };
        let group = handle.group();
        let Some(groups) = self.scopes.get_mut(&scope) else {
            return false;
        };
        let Some(handles) = groups.get_mut(&group) else {
            return false;
        };
        let Some(pos) = handles.iter().position(|h| AssetHandle::same(h, handle)) else {
            return false;
        };

        handles.remove(pos);
        if handles.is_empty() {
            groups.remove(&group);
        }
        if groups.is_empty() {
            self.scopes.remove(&scope);
        }
        true
    }

    /// Whether `scope` has any linked handle
    pub fn contains_scope(&self, scope: ScopeId) -> bool {
        self.scopes.contains_key(&scope)
    }

    /// Number of handles linked to `scope`
    pub fn handle_count(&self, scope: ScopeId) -> usize {
        self.scopes
            .get(&scope)
            .map(|groups| groups.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of scopes with linked handles
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Check if no scope is tracked
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

/// Publisher of "scope ended" notifications (scene unloads)
#[derive(Debug, Clone)]
pub struct ScopeEvents {
    sender: broadcast::Sender<ScopeId>,
}

impl ScopeEvents {
    /// Create a channel buffering up to `capacity` pending events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Announce that `scope` ended; returns how many subscribers were notified
    pub fn end_scope(&self, scope: ScopeId) -> usize {
        self.sender.send(scope).unwrap_or(0)
    }

    /// Subscribe to future scope-ended events
    pub fn subscribe(&self) -> broadcast::Receiver<ScopeId> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetkeep::testing::LocalRegistry;
    use assetkeep::Category;

    fn scoped(registry: &LocalRegistry, group: Group, scope: u32) -> Arc<AssetHandle> {
        AssetHandle::create(registry, group, Category::Prefab, Some(ScopeId(scope))).unwrap()
    }

    #[test]
    fn test_insert_and_take() {
        let registry = LocalRegistry::new();
        let mut index = ScopeIndex::new();
        let a = scoped(&registry, Group::Menu, 1);
        let b = scoped(&registry, Group::Game, 1);
        let c = scoped(&registry, Group::Game, 2);
        index.insert(ScopeId(1), Group::Menu, a.clone());
        index.insert(ScopeId(1), Group::Game, b.clone());
        index.insert(ScopeId(2), Group::Game, c);

        assert_eq!(index.len(), 2);
        assert_eq!(index.handle_count(ScopeId(1)), 2);

        let taken = index.take_scope(ScopeId(1));

        assert_eq!(taken.len(), 2);
        assert!(AssetHandle::same(&taken[0], &b));
        assert!(AssetHandle::same(&taken[1], &a));
        assert!(!index.contains_scope(ScopeId(1)));
        assert!(index.take_scope(ScopeId(1)).is_empty());
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_remove_handle_prunes_scope() {
        let registry = LocalRegistry::new();
        let mut index = ScopeIndex::new();
        let a = scoped(&registry, Group::Game, 7);
        index.insert(ScopeId(7), Group::Game, a.clone());

        assert!(index.remove_handle(&a));
        assert!(!index.remove_handle(&a));
        assert!(index.is_empty());
    }

    #[test]
    fn test_remove_unscoped_handle() {
        let registry = LocalRegistry::new();
        let mut index = ScopeIndex::new();
        let unscoped = AssetHandle::create(&registry, Group::Game, Category::UI, None).unwrap();

        assert!(!index.remove_handle(&unscoped));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let events = ScopeEvents::new(8);
        assert_eq!(events.end_scope(ScopeId(1)), 0);

        let mut rx = events.subscribe();
        assert_eq!(events.subscriber_count(), 1);
        assert_eq!(events.end_scope(ScopeId(4)), 1);
        assert_eq!(rx.recv().await.unwrap(), ScopeId(4));
    }
}
