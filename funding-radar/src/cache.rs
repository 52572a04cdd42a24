//! TTL-bound cache of computed opportunity lists.
//!
//! Entries are keyed by a canonicalized filter signature and die by TTL or
//! by generation bump when a new statistics snapshot publishes; expired or
//! invalidated entries are never resurrected. If the configured backend
//! becomes unreachable, the cache falls back transparently to an unbounded
//! in-process map and flags degraded mode rather than failing queries.

use crate::{error::CacheError, model::ArbitrageOpportunity};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::warn;

/// A cached, filtered and sorted opportunity list (pre-pagination).
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub opportunities: Vec<ArbitrageOpportunity>,
    pub expires_at: DateTime<Utc>,
    pub generation: u64,
}

/// Pluggable cache storage. Implementations must be safe under concurrent
/// reads from many query clients.
pub trait CacheBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError>;
    fn set(&self, key: &str, entry: CachedEntry) -> Result<(), CacheError>;
    fn invalidate_all(&self) -> Result<(), CacheError>;
}

/// In-process map backend; also serves as the degraded-mode fallback.
#[derive(Debug, Default)]
pub struct InMemoryCacheBackend {
    entries: RwLock<HashMap<String, CachedEntry>>,
}

impl CacheBackend for InMemoryCacheBackend {
    fn get(&self, key: &str) -> Result<Option<CachedEntry>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, entry: CachedEntry) -> Result<(), CacheError> {
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    fn invalidate_all(&self) -> Result<(), CacheError> {
        self.entries.write().clear();
        Ok(())
    }
}

/// Filter-aware result cache with TTL, generation-based invalidation, and
/// degraded-mode fallback.
pub struct ResultCache {
    backend: Option<Arc<dyn CacheBackend>>,
    fallback: InMemoryCacheBackend,
    generation: AtomicU64,
    degraded: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    ttl: ChronoDuration,
}

impl ResultCache {
    /// Cache served entirely from the in-process map.
    pub fn in_memory(ttl: Duration) -> Self {
        Self::build(None, ttl)
    }

    /// Cache backed by an external store, with in-process fallback.
    pub fn with_backend(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self::build(Some(backend), ttl)
    }

    fn build(backend: Option<Arc<dyn CacheBackend>>, ttl: Duration) -> Self {
        Self {
            backend,
            fallback: InMemoryCacheBackend::default(),
            generation: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(10)),
        }
    }

    /// Fetch a live entry for `signature`. Expired or stale-generation
    /// entries are treated as absent; an entry is never served past its TTL.
    pub fn get(&self, signature: &str, now: DateTime<Utc>) -> Option<Vec<ArbitrageOpportunity>> {
        let generation = self.generation.load(Ordering::Acquire);
        let entry = match self.active_backend().get(signature) {
            Ok(entry) => entry,
            Err(error) => {
                self.enter_degraded_mode(&error);
                self.fallback.get(signature).ok().flatten()
            }
        };

        match entry {
            Some(entry) if entry.generation == generation && now < entry.expires_at => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.opportunities)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a computed opportunity list under `signature` with the
    /// configured TTL.
    pub fn set(&self, signature: &str, opportunities: Vec<ArbitrageOpportunity>, now: DateTime<Utc>) {
        let entry = CachedEntry {
            opportunities,
            expires_at: now + self.ttl,
            generation: self.generation.load(Ordering::Acquire),
        };
        if let Err(error) = self.active_backend().set(signature, entry.clone()) {
            self.enter_degraded_mode(&error);
            let _ = self.fallback.set(signature, entry);
        }
    }

    /// Invalidate every entry. Called after each snapshot publication.
    /// Monotonic: the generation only ever increases, so invalidated
    /// entries cannot come back.
    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if let Err(error) = self.active_backend().invalidate_all() {
            self.enter_degraded_mode(&error);
        }
        let _ = self.fallback.invalidate_all();
    }

    /// Whether the external backend has been abandoned for the in-process
    /// fallback.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 { hits / total } else { 0.0 }
    }

    fn active_backend(&self) -> &dyn CacheBackend {
        match &self.backend {
            Some(backend) if !self.is_degraded() => backend.as_ref(),
            _ => &self.fallback,
        }
    }

    fn enter_degraded_mode(&self, error: &CacheError) {
        if !self.degraded.swap(true, Ordering::AcqRel) {
            warn!(%error, "cache backend unreachable, falling back to in-process cache");
        }
    }
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("external_backend", &self.backend.is_some())
            .field("degraded", &self.is_degraded())
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}
