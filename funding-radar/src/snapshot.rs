//! Versioned, atomically-swapped engine state.
//!
//! Statistics are published as an immutable snapshot replaced wholesale by
//! copy-and-swap: a concurrent reader sees either the complete old snapshot
//! or the complete new one, never a partial rebuild.

use crate::{
    model::{ArbitrageOpportunity, ContractStatistics, InstrumentKey, PairId, PairSpreadStatistics},
    spread::SpreadStatsMap,
};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;
use std::sync::Arc;

/// One published generation of engine state.
#[derive(Debug, Clone, Default)]
pub struct EngineSnapshot {
    pub version: u64,
    pub computed_at: Option<DateTime<Utc>>,
    pub contract_stats: FnvHashMap<InstrumentKey, ContractStatistics>,
    pub pair_stats: SpreadStatsMap,
    pub opportunities: Vec<ArbitrageOpportunity>,
}

impl EngineSnapshot {
    pub fn pair_stats_for(&self, pair: &PairId) -> Option<&PairSpreadStatistics> {
        self.pair_stats.get(pair)
    }
}

/// Shared handle to the current snapshot.
///
/// `load` is cheap (an `Arc` clone under a read lock); `publish` swaps in a
/// fully-built replacement and bumps the version.
#[derive(Debug, Default)]
pub struct SnapshotHandle {
    current: RwLock<Arc<EngineSnapshot>>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Arc<EngineSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Atomically replace the current snapshot. The version is assigned
    /// here, monotonically.
    pub fn publish(&self, mut next: EngineSnapshot) -> u64 {
        let mut guard = self.current.write();
        next.version = guard.version + 1;
        let version = next.version;
        *guard = Arc::new(next);
        version
    }
}
