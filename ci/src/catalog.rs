//! Dump catalog seam
//!
//! The catalog maps an upload id to the dump that produced its bundle. The
//! real catalog lives in an external database; `MemoryCatalog` serves tests
//! and single-process deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use bundlestore::QueryContext;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Catalog record for one uploaded bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dump {
    pub id: i64,
    /// Repository-relative directory the bundle was indexed from, e.g. `cmd/server/`
    pub root: String,
    pub commit: String,
}

impl Dump {
    pub fn new(id: i64, root: impl Into<String>, commit: impl Into<String>) -> Self {
        Self {
            id,
            root: root.into(),
            commit: commit.into(),
        }
    }
}

/// Errors from the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),

    #[error("catalog lookup canceled")]
    Canceled,
}

/// Lookup of dumps by upload id
#[async_trait]
pub trait DumpCatalog: Send + Sync {
    /// The dump with `id`, or `None` if no such upload exists
    async fn get_dump_by_id(&self, ctx: &QueryContext, id: i64) -> Result<Option<Dump>, CatalogError>;
}

/// Catalog held in memory
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    dumps: RwLock<HashMap<i64, Dump>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dumps(dumps: impl IntoIterator<Item = Dump>) -> Self {
        let catalog = Self::new();
        for dump in dumps {
            catalog.insert(dump);
        }
        catalog
    }

    pub fn insert(&self, dump: Dump) {
        debug!(id = dump.id, root = %dump.root, "MemoryCatalog::insert: called");
        match self.dumps.write() {
            Ok(mut dumps) => {
                dumps.insert(dump.id, dump);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(dump.id, dump);
            }
        }
    }
}

#[async_trait]
impl DumpCatalog for MemoryCatalog {
    async fn get_dump_by_id(&self, ctx: &QueryContext, id: i64) -> Result<Option<Dump>, CatalogError> {
        debug!(id, "MemoryCatalog::get_dump_by_id: called");
        if ctx.check().is_err() {
            return Err(CatalogError::Canceled);
        }
        let dumps = self
            .dumps
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;
        Ok(dumps.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup() {
        let catalog = MemoryCatalog::with_dumps([Dump::new(1, "", "deadbeef"), Dump::new(2, "web/", "cafe")]);
        let ctx = QueryContext::background();

        let dump = catalog.get_dump_by_id(&ctx, 2).await.unwrap().unwrap();
        assert_eq!(dump.root, "web/");
        assert!(catalog.get_dump_by_id(&ctx, 3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_canceled_lookup() {
        let catalog = MemoryCatalog::new();
        let (ctx, canceler) = QueryContext::background().with_cancel();
        canceler.cancel();

        let err = catalog.get_dump_by_id(&ctx, 1).await.unwrap_err();
        assert!(matches!(err, CatalogError::Canceled));
    }
}
