//! # keepcache
//!
//! Grouped, scope-aware cache for [`assetkeep`] handles.
//!
//! ## Architecture
//! - **GroupedCache**: Group -> Category -> handles, pruned as buckets drain
//! - **ScopeIndex**: scope -> handles, force-released when the scope ends
//! - **CacheManager**: owns both indexes, runs the periodic sweep, and
//!   listens for scope-ended events
//!
//! The sweep evicts a handle only when it opted into auto-release, is set
//! up, and the engine has cleared its resource.

#![warn(missing_docs)]

mod config;
pub mod global;
mod grouped;
mod lazy;
mod manager;
mod scope;
mod stats;

pub use config::CacheConfig;
pub use grouped::GroupedCache;
pub use lazy::LazyAsset;
pub use manager::CacheManager;
pub use scope::{ScopeEvents, ScopeIndex};
pub use stats::{CacheSnapshot, CacheStats, CategorySnapshot, GroupSnapshot};
