//! GroupedCache: handles indexed by (Group, Category)
//!
//! Buckets keep insertion order and compare handles by identity. Empty
//! buckets and groups are pruned as soon as they drain.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use ahash::RandomState;
use assetkeep::{AssetHandle, Category, Group};
use tracing::{error, warn};

use crate::stats::{CacheSnapshot, CategorySnapshot, GroupSnapshot};

type Bucket = Vec<Arc<AssetHandle>>;
type CategoryMap = HashMap<Category, Bucket, RandomState>;

/// Staleness check that keeps the handle when the engine panics
fn stale(handle: &AssetHandle) -> bool {
    panic::catch_unwind(AssertUnwindSafe(|| handle.is_stale())).unwrap_or_else(|_| {
        error!(
            "Staleness check panicked for {}/{} handle; keeping it",
            handle.group(),
            handle.category()
        );
        false
    })
}

/// Two-level index: Group -> Category -> handles in insertion order
#[derive(Default)]
pub struct GroupedCache {
    groups: HashMap<Group, CategoryMap, RandomState>,
}

impl GroupedCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handle to the (group, category) bucket
    pub fn add(&mut self, group: Group, category: Category, handle: Arc<AssetHandle>) {
        self.groups
            .entry(group)
            .or_default()
            .entry(category)
            .or_default()
            .push(handle);
    }

    /// Total number of handles
    pub fn len(&self) -> usize {
        self.groups.keys().map(|g| self.group_count(*g)).sum()
    }

    /// Check if no handle is indexed
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Number of handles in a group (0 if absent)
    pub fn group_count(&self, group: Group) -> usize {
        self.groups
            .get(&group)
            .map(|categories| categories.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    /// Number of handles in a bucket (0 if absent)
    pub fn category_count(&self, group: Group, category: Category) -> usize {
        self.bucket(group, category).map(Vec::len).unwrap_or(0)
    }

    /// Whether the group currently has any bucket
    pub fn contains_group(&self, group: Group) -> bool {
        self.groups.contains_key(&group)
    }

    fn bucket(&self, group: Group, category: Category) -> Option<&Bucket> {
        self.groups.get(&group)?.get(&category)
    }

    /// Handle at `index` of the bucket, or `None` with a warning
    pub fn find(&self, group: Group, category: Category, index: usize) -> Option<Arc<AssetHandle>> {
        let found = self
            .bucket(group, category)
            .and_then(|bucket| bucket.get(index))
            .cloned();
        if found.is_none() {
            warn!(
                "Invalid group {}, category {}, or index {} for GroupedCache::find",
                group, category, index
            );
        }
        found
    }

    /// Linear scan for `handle` by identity
    pub fn find_handle(&self, handle: &Arc<AssetHandle>) -> Option<Arc<AssetHandle>> {
        let found = self
            .groups
            .values()
            .flat_map(|categories| categories.values())
            .flat_map(|bucket| bucket.iter())
            .find(|candidate| AssetHandle::same(candidate, handle))
            .cloned();
        if found.is_none() {
            warn!("Handle not found in GroupedCache");
        }
        found
    }

    /// Remove `handle` (by identity) from its bucket without releasing it
    pub fn remove_handle(&mut self, handle: &Arc<AssetHandle>) -> bool {
        let (group, category) = (handle.group(), handle.category());
        let Some(categories) = self.groups.get_mut(&group) else {
            return false;
        };
        let Some(bucket) = categories.get_mut(&category) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|h| AssetHandle::same(h, handle)) else {
            return false;
        };

        bucket.remove(pos);
        if bucket.is_empty() {
            categories.remove(&category);
        }
        if categories.is_empty() {
            self.groups.remove(&group);
        }
        true
    }

    /// Sweep pass: release and drop every stale handle.
    ///
    /// A handle is evicted only if it opted into auto-release, is set up,
    /// and the engine has cleared its resource. Buckets are walked back to
    /// front so removal never shifts an unvisited index. Returns the
    /// evicted handles, already released.
    pub fn auto_release(&mut self) -> Vec<Arc<AssetHandle>> {
        let mut evicted = Vec::new();

        for categories in self.groups.values_mut() {
            for bucket in categories.values_mut() {
                for i in (0..bucket.len()).rev() {
                    if stale(&bucket[i]) {
                        bucket[i].release();
                        evicted.push(bucket.remove(i));
                    }
                }
                if !bucket.is_empty() {
                    bucket.shrink_to_fit();
                }
            }
            categories.retain(|_, bucket| !bucket.is_empty());
        }
        self.groups.retain(|_, categories| !categories.is_empty());

        evicted
    }

    /// Force-release every handle of a group and drop the group
    pub fn release_group(&mut self, group: Group) -> Vec<Arc<AssetHandle>> {
        let Some(categories) = self.groups.remove(&group) else {
            warn!("No data found for group {} in GroupedCache", group);
            return Vec::new();
        };

        let released: Vec<_> = categories.into_values().flatten().collect();
        for handle in &released {
            handle.release();
        }
        released
    }

    /// Force-release every handle of a bucket and drop the bucket
    pub fn release_category(&mut self, group: Group, category: Category) -> Vec<Arc<AssetHandle>> {
        let Some(bucket) = self
            .groups
            .get_mut(&group)
            .and_then(|categories| categories.remove(&category))
        else {
            warn!(
                "No data found for group {}, category {} in GroupedCache",
                group, category
            );
            return Vec::new();
        };

        if self.groups.get(&group).is_some_and(|c| c.is_empty()) {
            self.groups.remove(&group);
        }
        for handle in &bucket {
            handle.release();
        }
        bucket
    }

    /// Point-in-time counts per group and category, in declaration order
    pub fn snapshot(&self) -> CacheSnapshot {
        let groups = Group::ALL
            .into_iter()
            .filter_map(|group| {
                let categories = self.groups.get(&group)?;
                let categories = Category::ALL
                    .into_iter()
                    .filter_map(|category| {
                        let bucket = categories.get(&category)?;
                        Some(CategorySnapshot {
                            category,
                            count: bucket.len(),
                            loaded: bucket.iter().filter(|h| h.is_loaded_and_setup()).count(),
                        })
                    })
                    .collect();
                Some(GroupSnapshot {
                    group,
                    total: self.group_count(group),
                    categories,
                })
            })
            .collect();

        CacheSnapshot { groups }
    }
}
