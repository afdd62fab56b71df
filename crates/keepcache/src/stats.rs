//! Cache statistics tracking

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use assetkeep::{Category, Group};

/// Lifetime counters for a cache manager
#[derive(Debug, Default)]
pub struct CacheStats {
    registrations: AtomicU64,
    sweeps: AtomicU64,
    evictions: AtomicU64,
    forced_releases: AtomicU64,
    scope_teardowns: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a handle registration
    pub fn record_registration(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one sweep pass and how many handles it evicted
    pub fn record_sweep(&self, evicted: usize) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Record handles force-released by a group/category release
    pub fn record_forced_release(&self, count: usize) {
        self.forced_releases.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a scope teardown
    pub fn record_scope_teardown(&self) {
        self.scope_teardowns.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total registrations
    pub fn registrations(&self) -> u64 {
        self.registrations.load(Ordering::Relaxed)
    }

    /// Get total sweep passes
    pub fn sweeps(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Get total sweep evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get total forced releases
    pub fn forced_releases(&self) -> u64 {
        self.forced_releases.load(Ordering::Relaxed)
    }

    /// Get total scope teardowns
    pub fn scope_teardowns(&self) -> u64 {
        self.scope_teardowns.load(Ordering::Relaxed)
    }

    /// Reset all statistics
    pub fn reset(&self) {
        self.registrations.store(0, Ordering::Relaxed);
        self.sweeps.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.forced_releases.store(0, Ordering::Relaxed);
        self.scope_teardowns.store(0, Ordering::Relaxed);
    }
}

/// Per-category counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategorySnapshot {
    /// Category
    pub category: Category,
    /// Handles in the bucket
    pub count: usize,
    /// Handles that are loaded and set up
    pub loaded: usize,
}

/// Per-group counts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    /// Group
    pub group: Group,
    /// Handles across all categories
    pub total: usize,
    /// Non-empty categories
    pub categories: Vec<CategorySnapshot>,
}

/// Read-only view of the grouped cache at one instant
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheSnapshot {
    /// Non-empty groups
    pub groups: Vec<GroupSnapshot>,
}

impl CacheSnapshot {
    /// Total handles across all groups
    pub fn total(&self) -> usize {
        self.groups.iter().map(|g| g.total).sum()
    }
}

impl fmt::Display for CacheSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "GroupedCache Stats:")?;
        for group in &self.groups {
            writeln!(f, "Group: {}, Total Count: {}", group.group, group.total)?;
            for category in &group.categories {
                writeln!(
                    f,
                    "  Category: {}, Count: {}, Loaded: {}",
                    category.category, category.count, category.loaded
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_registration();
        stats.record_registration();
        stats.record_sweep(0);
        stats.record_sweep(3);
        stats.record_forced_release(2);
        stats.record_scope_teardown();

        assert_eq!(stats.registrations(), 2);
        assert_eq!(stats.sweeps(), 2);
        assert_eq!(stats.evictions(), 3);
        assert_eq!(stats.forced_releases(), 2);
        assert_eq!(stats.scope_teardowns(), 1);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_registration();
        stats.record_sweep(1);
        stats.reset();

        assert_eq!(stats.registrations(), 0);
        assert_eq!(stats.sweeps(), 0);
        assert_eq!(stats.evictions(), 0);
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = CacheSnapshot {
            groups: vec![GroupSnapshot {
                group: Group::Menu,
                total: 3,
                categories: vec![
                    CategorySnapshot {
                        category: Category::UI,
                        count: 2,
                        loaded: 1,
                    },
                    CategorySnapshot {
                        category: Category::Audio,
                        count: 1,
                        loaded: 0,
                    },
                ],
            }],
        };

        assert_eq!(
            snapshot.to_string(),
            "GroupedCache Stats:\n\
             Group: Menu, Total Count: 3\n  \
             Category: UI, Count: 2, Loaded: 1\n  \
             Category: Audio, Count: 1, Loaded: 0\n"
        );
        assert_eq!(snapshot.total(), 3);
        assert_eq!(CacheSnapshot::default().to_string(), "GroupedCache Stats:\n");
    }
}
