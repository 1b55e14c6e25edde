//! Bundle cache backends.
//!
//! The cache is the node's single source of durable truth: one bundle
//! per RID, overwritten in place on updates, removed on forgets. The
//! [`Cache`] trait abstracts the backend so the node and its tests can
//! run against the filesystem or plain memory interchangeably.

pub mod file;
pub mod memory;

use koinet_protocol::Bundle;
use koinet_types::{Result, Rid};

pub use file::FileCache;
pub use memory::MemoryCache;

/// A keyed store of bundles, one per RID.
///
/// Implementations must be safe to share across threads; the node holds
/// a single cache behind an `Arc`.
pub trait Cache: Send + Sync {
    /// True if a bundle is cached under `rid`.
    fn exists(&self, rid: &Rid) -> Result<bool>;

    /// Reads the bundle cached under `rid`, if any.
    fn read(&self, rid: &Rid) -> Result<Option<Bundle>>;

    /// Writes a bundle, replacing any prior version of the same RID.
    fn write(&self, bundle: &Bundle) -> Result<()>;

    /// Deletes the bundle under `rid`. Deleting an absent RID is a no-op.
    fn delete(&self, rid: &Rid) -> Result<()>;

    /// Lists every cached RID, in no particular order.
    fn list_rids(&self) -> Result<Vec<Rid>>;
}
