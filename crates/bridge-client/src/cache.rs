//! Cache-aside metadata cache with TTL-based freshness.
//!
//! Caching strategy:
//! - LRU bound on the number of keys per dimension
//! - TTL-based staleness with lazy evaluation
//! - Thread-safe access via `RwLock`
//!
//! # Locking
//!
//! Every key owns its own slot behind a `tokio::sync::RwLock`. Fresh reads take
//! the slot's read lock only. A stale or missing value is reloaded under the
//! slot's write lock after re-checking freshness, so concurrent readers of the
//! same key trigger exactly one reload while readers of other keys (and of
//! other dimensions) are never blocked.
//!
//! A slot that the LRU bound evicts while a reader or a load still holds it
//! stays reachable until that caller lets go, so a new reader of the key
//! joins the existing slot instead of loading a second time.
//!
//! # Staleness
//!
//! Entries are never refreshed in the background. A stale entry is reloaded
//! by the next read; `invalidate_all()` drops every entry at once.

use crate::catalog::CatalogLoader;
use crate::column::ColumnDescriptor;
use crate::error::Result;
use crate::types::{Database, TableInfo};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Cached value with timestamp for TTL-based expiration.
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    cached_at: Instant,
}

impl<T> CachedEntry<T> {
    fn new(value: T) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() < ttl
    }
}

type Slot<V> = Arc<RwLock<Option<CachedEntry<V>>>>;

struct Slots<K: Hash + Eq, V> {
    live: LruCache<K, Slot<V>>,
    /// Evicted from `live` while still held by a caller
    evicted: HashMap<K, Weak<RwLock<Option<CachedEntry<V>>>>>,
}

/// A keyed, memoized value store with TTL freshness.
pub struct TtlMemo<K: Hash + Eq, V> {
    name: &'static str,
    slots: Mutex<Slots<K, V>>,
    ttl: Duration,
    hits: AtomicU64,
    loads: AtomicU64,
}

impl<K, V> TtlMemo<K, V>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone,
{
    /// Create a memo holding at most `capacity` keys.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            name,
            slots: Mutex::new(Slots {
                live: LruCache::new(capacity),
                evicted: HashMap::new(),
            }),
            ttl,
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
        }
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.live.get(key) {
            return Arc::clone(slot);
        }

        let slot = slots
            .evicted
            .remove(key)
            .and_then(|weak| weak.upgrade())
            .unwrap_or_else(|| Arc::new(RwLock::new(None)));
        if let Some((old_key, old)) = slots.live.push(key.clone(), Arc::clone(&slot)) {
            if Arc::strong_count(&old) > 1 {
                slots.evicted.retain(|_, weak| weak.strong_count() > 0);
                slots.evicted.insert(old_key, Arc::downgrade(&old));
            }
        }
        slot
    }

    /// Return the fresh value for `key`, calling `load` if it is stale or absent.
    ///
    /// A failed load leaves the previous entry (if any) untouched.
    pub async fn get_or_load<F, Fut>(&self, key: K, load: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slot(&key);

        {
            let entry = slot.read().await;
            if let Some(entry) = entry.as_ref().filter(|e| e.is_fresh(self.ttl)) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(cache = self.name, key = ?key, "Cache hit");
                return Ok(entry.value.clone());
            }
        }

        let mut entry = slot.write().await;
        // Another caller may have reloaded while we waited for the write lock.
        if let Some(fresh) = entry.as_ref().filter(|e| e.is_fresh(self.ttl)) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(fresh.value.clone());
        }

        tracing::debug!(cache = self.name, key = ?key, "Cache miss, loading");
        let value = load().await?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        *entry = Some(CachedEntry::new(value.clone()));
        Ok(value)
    }

    /// Drop every entry. Loads in flight finish into detached slots.
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        slots.live.clear();
        slots.evicted.clear();
    }

    /// Number of keys currently tracked (fresh or stale).
    pub fn len(&self) -> usize {
        self.slots.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of this dimension's counters.
    ///
    /// Slots locked by a reload in progress are skipped.
    pub fn stats(&self) -> MemoStats {
        let slots = self.slots.lock();
        let mut entries = 0;
        let mut expired = 0;
        for (_, slot) in slots.live.iter() {
            if let Ok(guard) = slot.try_read() {
                if let Some(entry) = guard.as_ref() {
                    entries += 1;
                    if !entry.is_fresh(self.ttl) {
                        expired += 1;
                    }
                }
            }
        }
        MemoStats {
            entries,
            expired,
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
        }
    }
}

/// Counters for one cache dimension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    /// Keys holding a value
    pub entries: usize,
    /// Of those, how many are past their TTL
    pub expired: usize,
    /// Reads served from cache
    pub hits: u64,
    /// Successful remote loads
    pub loads: u64,
}

/// Catalog cache owned by one shared session.
pub struct MetadataCache {
    loader: CatalogLoader,
    databases: TtlMemo<(), Vec<Database>>,
    schemas: TtlMemo<i64, Vec<String>>,
    tables: TtlMemo<(i64, String), Vec<TableInfo>>,
    columns: TtlMemo<i64, Vec<ColumnDescriptor>>,
    ttl: Duration,
}

impl MetadataCache {
    pub(crate) fn new(loader: CatalogLoader, capacity: usize, ttl: Duration) -> Self {
        Self {
            loader,
            databases: TtlMemo::new("databases", 1, ttl),
            schemas: TtlMemo::new("schemas", capacity, ttl),
            tables: TtlMemo::new("tables", capacity, ttl),
            columns: TtlMemo::new("columns", capacity, ttl),
            ttl,
        }
    }

    /// Every database visible to the session's user.
    pub async fn databases(&self) -> Result<Vec<Database>> {
        self.databases
            .get_or_load((), || self.loader.databases())
            .await
    }

    /// Schema names of one database.
    pub async fn schemas(&self, database_id: i64) -> Result<Vec<String>> {
        self.schemas
            .get_or_load(database_id, || self.loader.schemas(database_id))
            .await
    }

    /// Tables of one schema.
    pub async fn tables(&self, database_id: i64, schema: &str) -> Result<Vec<TableInfo>> {
        self.tables
            .get_or_load((database_id, schema.to_string()), || {
                self.loader.tables(database_id, schema)
            })
            .await
    }

    /// Top-level columns of one table.
    pub async fn columns(&self, table_id: i64) -> Result<Vec<ColumnDescriptor>> {
        self.columns
            .get_or_load(table_id, || self.loader.columns(table_id))
            .await
    }

    /// Drop every cached entry in every dimension.
    pub fn invalidate_all(&self) {
        self.databases.clear();
        self.schemas.clear();
        self.tables.clear();
        self.columns.clear();
        tracing::debug!("Metadata cache cleared");
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            databases: self.databases.stats(),
            schemas: self.schemas.stats(),
            tables: self.tables.stats(),
            columns: self.columns.stats(),
            ttl: self.ttl,
        }
    }
}

/// Cache statistics for monitoring.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub databases: MemoStats,
    pub schemas: MemoStats,
    pub tables: MemoStats,
    pub columns: MemoStats,
    /// Current TTL setting
    pub ttl: Duration,
}
