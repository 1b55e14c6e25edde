//! In-memory bundle cache, used by tests and ephemeral nodes.

use std::collections::HashMap;
use std::sync::RwLock;

use koinet_protocol::Bundle;
use koinet_types::{KoiNetError, Result, Rid};

use crate::Cache;

/// Bundle cache held entirely in memory.
#[derive(Default)]
pub struct MemoryCache {
    bundles: RwLock<HashMap<Rid, Bundle>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> KoiNetError {
    KoiNetError::StorageError {
        reason: "memory cache lock poisoned".into(),
    }
}

impl Cache for MemoryCache {
    fn exists(&self, rid: &Rid) -> Result<bool> {
        Ok(self.bundles.read().map_err(|_| poisoned())?.contains_key(rid))
    }

    fn read(&self, rid: &Rid) -> Result<Option<Bundle>> {
        Ok(self.bundles.read().map_err(|_| poisoned())?.get(rid).cloned())
    }

    fn write(&self, bundle: &Bundle) -> Result<()> {
        self.bundles
            .write()
            .map_err(|_| poisoned())?
            .insert(bundle.rid().clone(), bundle.clone());
        Ok(())
    }

    fn delete(&self, rid: &Rid) -> Result<()> {
        self.bundles.write().map_err(|_| poisoned())?.remove(rid);
        Ok(())
    }

    fn list_rids(&self) -> Result<Vec<Rid>> {
        Ok(self
            .bundles
            .read()
            .map_err(|_| poisoned())?
            .keys()
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
