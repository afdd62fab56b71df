//! # assetkeep
//!
//! Handle-based asset state machine over an injected loading backend.
//!
//! ## Architecture
//! - **Classification**: closed `Group` x `Category` namespaces
//! - **Backend**: `AssetLoader` + `Instantiator` contracts, supplied by the host engine
//! - **AssetHandle**: one load (scalar or array) with at most one load in flight
//!
//! Handles never exist on their own: [`AssetHandle::create`] registers each
//! new handle into a [`HandleRegistry`] (normally a cache manager).

#![warn(missing_docs)]

mod asset;
mod classify;
mod error;
mod handle;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use asset::{downcast, AsAny, Asset, AssetLoader, Backend, InstanceId, Instantiator, Resource};
pub use classify::{Category, Group, ScopeId};
pub use error::{BoxError, Error, Result};
pub use handle::{AssetHandle, HandleRegistry, HandleStatus};
