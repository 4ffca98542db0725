//! Bundle manager seam
//!
//! Routes an upload id to an opened bundle database. `LocalBundleManager`
//! serves bundle files from a local directory and keeps a bounded set of
//! them open.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bundlestore::{Database, QueryContext, ReaderError, SqliteReader, StoreError};
use tokio::sync::{Mutex, MutexGuard, OnceCell};
use tracing::{debug, info, warn};

use crate::config::StorageConfig;

/// Resolves upload ids to bundle databases
#[async_trait]
pub trait BundleManagerClient: Send + Sync {
    /// Open (or reuse) the bundle for upload `id`
    ///
    /// A missing bundle file surfaces as an error for which
    /// `ReaderError::is_bundle_not_found` is true.
    async fn database(&self, ctx: &QueryContext, id: i64) -> Result<Arc<Database>, ReaderError>;
}

/// One cached bundle; filled once by whichever request opens it first
type Slot = Arc<OnceCell<Arc<Database>>>;

#[derive(Default)]
struct Cache {
    entries: HashMap<i64, Slot>,
    /// Least recently used first
    order: VecDeque<i64>,
}

impl Cache {
    fn touch(&mut self, id: i64) {
        self.order.retain(|cached| *cached != id);
        self.order.push_back(id);
    }

    fn remove(&mut self, id: i64) -> Option<Slot> {
        self.order.retain(|cached| *cached != id);
        self.entries.remove(&id)
    }
}

/// Bundle manager over `<bundle_dir>/<id>.lsif.db` files
///
/// The cache lock only guards the id-to-slot map. Opening, migrating and
/// closing bundles happen outside it.
pub struct LocalBundleManager {
    storage: StorageConfig,
    cache: Mutex<Cache>,
}

impl LocalBundleManager {
    pub fn new(storage: StorageConfig) -> Self {
        debug!(bundle_dir = %storage.bundle_dir.display(), capacity = storage.reader_cache_size, "LocalBundleManager::new: called");
        Self {
            storage,
            cache: Mutex::new(Cache::default()),
        }
    }

    /// Number of currently open bundles
    pub async fn open_count(&self) -> usize {
        self.cache
            .lock()
            .await
            .entries
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Close every cached bundle
    pub async fn close_all(&self) -> Result<(), ReaderError> {
        debug!("close_all: called");
        let drained: Vec<(i64, Slot)> = {
            let mut cache = self.cache.lock().await;
            cache.order.clear();
            cache.entries.drain().collect()
        };

        let mut first_err = None;
        for (id, slot) in drained {
            let Some(db) = slot.get() else {
                continue;
            };
            if let Err(e) = db.close().await {
                warn!(id, error = %e, "Failed to close bundle");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Take the cache lock unless the request gives up first
    async fn lock_cache(&self, ctx: &QueryContext) -> Result<MutexGuard<'_, Cache>, ReaderError> {
        let lock_err = |source: StoreError| ReaderError::Store {
            op: "bundle_manager.lock",
            source,
        };
        ctx.check().map_err(lock_err)?;
        tokio::select! {
            guard = self.cache.lock() => Ok(guard),
            err = ctx.done() => Err(lock_err(err)),
        }
    }

    async fn open(&self, ctx: &QueryContext, id: i64) -> Result<Arc<Database>, ReaderError> {
        let path = self.storage.bundle_path(id);
        let reader = SqliteReader::open(ctx, &path).await?;
        info!(id, path = %path.display(), "Opened bundle");
        Ok(Arc::new(Database::new(Arc::new(reader))))
    }

    /// Drop a slot whose open failed, unless another request already replaced it
    async fn forget(&self, id: i64, slot: &Slot) {
        let mut cache = self.cache.lock().await;
        if cache
            .entries
            .get(&id)
            .is_some_and(|cached| Arc::ptr_eq(cached, slot) && !cached.initialized())
        {
            cache.remove(id);
        }
    }

    /// Trim the cache to capacity, then close the evicted bundles
    async fn evict(&self) {
        let capacity = self.storage.reader_cache_size.max(1);
        let evicted: Vec<(i64, Slot)> = {
            let mut cache = self.cache.lock().await;
            let mut evicted = Vec::new();
            while cache.entries.len() > capacity {
                let Some(id) = cache.order.pop_front() else {
                    break;
                };
                if let Some(slot) = cache.entries.remove(&id) {
                    evicted.push((id, slot));
                }
            }
            evicted
        };

        for (id, slot) in evicted {
            let Some(db) = slot.get() else {
                continue;
            };
            debug!(id, "evict: closing bundle");
            // In-flight requests keep their handle; the file closes when the last one drops
            if Arc::strong_count(&slot) == 1
                && Arc::strong_count(db) == 1
                && let Err(e) = db.close().await
            {
                warn!(id, error = %e, "Failed to close evicted bundle");
            }
        }
    }
}

#[async_trait]
impl BundleManagerClient for LocalBundleManager {
    async fn database(&self, ctx: &QueryContext, id: i64) -> Result<Arc<Database>, ReaderError> {
        debug!(id, "database: called");
        let slot = {
            let mut cache = self.lock_cache(ctx).await?;
            let slot = Arc::clone(cache.entries.entry(id).or_default());
            cache.touch(id);
            slot
        };

        if let Some(db) = slot.get() {
            debug!(id, "database: cache hit");
            return Ok(Arc::clone(db));
        }

        // Concurrent requests for the same id wait on one open
        let opened = tokio::select! {
            result = slot.get_or_try_init(|| self.open(ctx, id)) => result.map(Arc::clone),
            err = ctx.done() => Err(ReaderError::Store { op: "bundle_manager.open", source: err }),
        };

        match opened {
            Ok(db) => {
                self.evict().await;
                Ok(db)
            }
            Err(e) => {
                self.forget(id, &slot).await;
                Err(e)
            }
        }
    }
}
