//! Cycle orchestration: periodic statistics ticks, the bulk spread pass,
//! snapshot publication and the query entry point.
//!
//! Scheduling model: fast and slow ticks drive per-instrument statistics at
//! zone-dependent cadence; the bulk pair-spread pass runs on its own cadence
//! and must not block incremental updates. Every cycle reads a closed,
//! immutable observation window ("last W days as of cycle start"), so
//! ongoing writers never block readers. Publication is copy-and-swap; an
//! overlapping bulk trigger is deferred, never run concurrently.

use crate::{
    cache::ResultCache,
    config::EngineConfig,
    error::EngineError,
    model::{
        ArbitrageOpportunity, ConfidenceTier, ContractState, ContractStatistics, Observation,
        OpportunityLeg, Zone,
    },
    pairing::{CandidatePair, PairMatcher, live_contracts_by_key},
    query::{self, OpportunityFilter, Page, QueryResponse, SortBy},
    snapshot::{EngineSnapshot, SnapshotHandle},
    spread::{SpreadStatisticsEngine, apr_series_by_instrument},
    statistics::StatisticsCalculator,
    store::{ContractRegistry, ObservationStore},
    zone::ZoneScheduler,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::{info, warn};

/// Which per-instrument cadence a tick serves.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TickCadence {
    /// Active-zone instruments.
    Fast,
    /// Stable-zone instruments.
    Slow,
}

/// Outcome of a bulk cycle trigger.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleTelemetry),
    /// Another bulk pass was in flight; this trigger was dropped.
    Deferred,
}

/// Operational telemetry of the most recent bulk cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleTelemetry {
    pub snapshot_version: u64,
    pub cycle_duration_ms: u64,
    pub instruments_live: usize,
    pub pairs_processed: usize,
    pub pairs_excluded_insufficient: usize,
    pub opportunities: usize,
    pub deferred_cycles: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub cache_degraded: bool,
    pub computed_at: Option<DateTime<Utc>>,
}

/// The funding rate radar: statistics, pairing, spread grading and queries.
pub struct RadarEngine {
    config: EngineConfig,
    store: Arc<dyn ObservationStore>,
    registry: Arc<dyn ContractRegistry>,
    calculator: StatisticsCalculator,
    matcher: PairMatcher,
    spread_engine: SpreadStatisticsEngine,
    snapshot: SnapshotHandle,
    cache: ResultCache,
    zones: Mutex<ZoneScheduler>,
    /// Single-flight guard for the bulk pass.
    bulk_guard: tokio::sync::Mutex<()>,
    /// Serializes read-modify-publish so concurrent publishers cannot lose
    /// each other's updates. Held briefly; never across the heavy compute.
    publish_lock: Mutex<()>,
    deferred_cycles: AtomicU64,
    last_telemetry: RwLock<CycleTelemetry>,
}

impl RadarEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn ObservationStore>,
        registry: Arc<dyn ContractRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            calculator: StatisticsCalculator::new(&config),
            matcher: PairMatcher::new(),
            spread_engine: SpreadStatisticsEngine::new(&config),
            snapshot: SnapshotHandle::new(),
            cache: ResultCache::in_memory(config.cache_ttl),
            zones: Mutex::new(ZoneScheduler::new(&config)),
            bulk_guard: tokio::sync::Mutex::new(()),
            publish_lock: Mutex::new(()),
            deferred_cycles: AtomicU64::new(0),
            last_telemetry: RwLock::new(CycleTelemetry::default()),
            config,
            store,
            registry,
        })
    }

    /// Replace the in-memory result cache with one backed by an external
    /// store (falls back in-process when that backend is unreachable).
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn current_snapshot(&self) -> Arc<EngineSnapshot> {
        self.snapshot.load()
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Per-instrument statistics feed for external monitoring surfaces.
    pub fn statistics_feed(&self) -> Vec<ContractStatistics> {
        let snapshot = self.snapshot.load();
        let mut feed: Vec<ContractStatistics> = snapshot.contract_stats.values().cloned().collect();
        feed.sort_by(|a, b| a.key.cmp(&b.key));
        feed
    }

    pub fn telemetry(&self) -> CycleTelemetry {
        self.last_telemetry.read().clone()
    }

    /// Refresh statistics for instruments due under `cadence`.
    ///
    /// Returns the number of instruments recomputed. A store failure skips
    /// the tick; the previously published snapshot remains served.
    pub async fn run_instrument_tick(&self, cadence: TickCadence) -> Result<usize, EngineError> {
        let cycle_start = Utc::now();
        let (contracts, observations) = self.closed_window(cycle_start).await?;
        let live = live_contracts_by_key(&contracts);
        let series = apr_series_by_instrument(&observations, &live);

        let target_zone = match cadence {
            TickCadence::Fast => Zone::Active,
            TickCadence::Slow => Zone::Stable,
        };

        let mut refreshed: Vec<ContractStatistics> = Vec::new();
        let mut emptied: Vec<crate::model::InstrumentKey> = Vec::new();
        {
            let mut zones = self.zones.lock();
            zones.retain(|key| live.contains_key(key));
            for (key, contract) in &live {
                if zones.zone(key) != target_zone || !zones.is_due(key, cycle_start) {
                    continue;
                }
                let apr_values: Vec<f64> = series
                    .get(key)
                    .map(|s| s.iter().map(|(_, apr)| *apr).collect())
                    .unwrap_or_default();
                let stats =
                    self.calculator
                        .calculate(contract, &apr_values, zones.zone(key), cycle_start);
                let z = stats.as_ref().and_then(|s| s.z_score);
                let zone = zones.observe(key, z, cycle_start);
                zones.mark_computed(key, cycle_start);

                match stats {
                    Some(mut stats) => {
                        stats.zone = zone;
                        refreshed.push(stats);
                    }
                    // below the emission threshold: no statistics entry
                    None => emptied.push(key.clone()),
                }
            }
        }

        let refreshed_count = refreshed.len();
        if refreshed_count > 0 || !emptied.is_empty() {
            let _publish = self.publish_lock.lock();
            let base = self.snapshot.load();
            let mut contract_stats = base.contract_stats.clone();
            contract_stats.retain(|key, _| live.contains_key(key));
            for stats in refreshed {
                contract_stats.insert(stats.key.clone(), stats);
            }
            for key in &emptied {
                contract_stats.remove(key);
            }
            self.snapshot.publish(EngineSnapshot {
                version: 0,
                computed_at: base.computed_at,
                contract_stats,
                pair_stats: base.pair_stats.clone(),
                opportunities: base.opportunities.clone(),
            });
            self.cache.invalidate_all();
        }
        Ok(refreshed_count)
    }

    /// Run the bulk pair-spread aggregation pass and publish a new snapshot.
    ///
    /// Single-flight: if a pass is already running, this trigger is deferred
    /// (dropped, counted in telemetry), never run in parallel and never used
    /// to cancel the in-flight pass.
    pub async fn run_bulk_cycle(&self) -> Result<CycleOutcome, EngineError> {
        let Ok(_guard) = self.bulk_guard.try_lock() else {
            let deferred = self.deferred_cycles.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(deferred_total = deferred, "bulk cycle already in flight, trigger deferred");
            return Ok(CycleOutcome::Deferred);
        };

        let started = std::time::Instant::now();
        let cycle_start = Utc::now();
        let (contracts, observations) = self.closed_window(cycle_start).await?;

        let computation = self.spread_engine.compute(&observations, &contracts);
        let candidates = self.matcher.candidate_pairs(&contracts);

        let opportunities: Vec<ArbitrageOpportunity> = {
            let base = self.snapshot.load();
            candidates
                .iter()
                .map(|candidate| self.build_opportunity(candidate, &computation.stats, &base, cycle_start))
                .collect()
        };

        let live_count = contracts.iter().filter(|c| c.is_live()).count();
        let version = {
            let _publish = self.publish_lock.lock();
            let base = self.snapshot.load();
            let mut contract_stats = base.contract_stats.clone();
            let live = live_contracts_by_key(&contracts);
            contract_stats.retain(|key, _| live.contains_key(key));
            self.snapshot.publish(EngineSnapshot {
                version: 0,
                computed_at: Some(cycle_start),
                contract_stats,
                pair_stats: computation.stats,
                opportunities,
            })
        };
        self.cache.invalidate_all();

        let snapshot = self.snapshot.load();
        let telemetry = CycleTelemetry {
            snapshot_version: version,
            cycle_duration_ms: started.elapsed().as_millis() as u64,
            instruments_live: live_count,
            pairs_processed: computation.pairs_processed,
            pairs_excluded_insufficient: computation.pairs_excluded,
            opportunities: snapshot.opportunities.len(),
            deferred_cycles: self.deferred_cycles.load(Ordering::Relaxed),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            cache_hit_ratio: self.cache.hit_ratio(),
            cache_degraded: self.cache.is_degraded(),
            computed_at: Some(cycle_start),
        };
        *self.last_telemetry.write() = telemetry.clone();

        info!(
            version,
            duration_ms = telemetry.cycle_duration_ms,
            instruments = telemetry.instruments_live,
            pairs = telemetry.pairs_processed,
            excluded = telemetry.pairs_excluded_insufficient,
            opportunities = telemetry.opportunities,
            "bulk statistics cycle published"
        );
        Ok(CycleOutcome::Completed(telemetry))
    }

    /// Query the published opportunity list, consulting the result cache
    /// before filtering the snapshot.
    pub fn query(&self, filter: &OpportunityFilter, sort: SortBy, page: Page) -> QueryResponse {
        let now = Utc::now();
        let signature = filter.canonical_signature(sort);

        if let Some(matched) = self.cache.get(&signature, now) {
            return query::paginate(matched, page, true);
        }

        let snapshot = self.snapshot.load();
        let matched = query::filter_and_sort(&snapshot.opportunities, filter, sort);
        self.cache.set(&signature, matched.clone(), now);
        query::paginate(matched, page, false)
    }

    /// Fetch the closed observation window as of `cycle_start`.
    async fn closed_window(
        &self,
        cycle_start: DateTime<Utc>,
    ) -> Result<(Vec<ContractState>, Vec<Observation>), EngineError> {
        let contracts = self.registry.live_contracts().await?;
        let window_start =
            cycle_start - ChronoDuration::hours(i64::from(self.config.window_days) * 24);
        let observations = self
            .store
            .observations_in_window(window_start, cycle_start)
            .await?;
        Ok((contracts, observations))
    }

    fn build_opportunity(
        &self,
        candidate: &CandidatePair,
        pair_stats: &crate::spread::SpreadStatsMap,
        base: &EngineSnapshot,
        computed_at: DateTime<Utc>,
    ) -> ArbitrageOpportunity {
        let stats = pair_stats.get(&candidate.pair);
        let spread_z_score =
            stats.and_then(|s| self.spread_engine.spread_z_score(s, candidate.apr_spread));
        let confidence = stats
            .map(|s| ConfidenceTier::from_count(s.data_point_count))
            .unwrap_or(ConfidenceTier::None);

        ArbitrageOpportunity {
            pair: candidate.pair.clone(),
            base_asset: candidate.base_asset.clone(),
            first: self.build_leg(&candidate.first, base),
            second: self.build_leg(&candidate.second, base),
            apr_spread: candidate.apr_spread,
            spread_z_score,
            confidence,
            computed_at,
        }
    }

    fn build_leg(&self, contract: &ContractState, base: &EngineSnapshot) -> OpportunityLeg {
        OpportunityLeg {
            key: contract.key.clone(),
            funding_rate: contract.current_rate,
            funding_interval_hours: contract.funding_interval_hours,
            apr: contract.current_apr().unwrap_or(0.0),
            mark_price: contract.mark_price,
            open_interest: contract.open_interest,
            confidence: base
                .contract_stats
                .get(&contract.key)
                .map(|stats| stats.confidence)
                .unwrap_or(ConfidenceTier::None),
        }
    }
}

impl std::fmt::Debug for RadarEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RadarEngine")
            .field("config", &self.config)
            .field("snapshot_version", &self.snapshot.load().version)
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::EngineError,
        store::{InMemoryContractRegistry, InMemoryObservationStore},
    };
    use async_trait::async_trait;
    use smol_str::SmolStr;

    fn seed_observation(venue: &str, hours_ago: i64, rate: f64) -> Observation {
        Observation {
            venue: SmolStr::new(venue),
            symbol: SmolStr::new("BTC-PERP"),
            base_asset: SmolStr::new("BTC"),
            quote_asset: SmolStr::new("USDT"),
            time: Utc::now() - ChronoDuration::hours(hours_ago),
            funding_rate: rate,
            funding_interval_hours: 8.0,
            mark_price: Some(50_000.0),
            open_interest: Some(1_000_000.0),
        }
    }

    fn seed_contract(venue: &str, rate: f64) -> ContractState {
        ContractState {
            key: crate::model::InstrumentKey::new(venue, "BTC-PERP"),
            base_asset: SmolStr::new("BTC"),
            quote_asset: SmolStr::new("USDT"),
            current_rate: rate,
            funding_interval_hours: 8.0,
            mark_price: Some(50_000.0),
            open_interest: Some(1_000_000.0),
            last_updated: Utc::now(),
            is_stale: false,
        }
    }

    fn seeded_engine() -> RadarEngine {
        let store = Arc::new(InMemoryObservationStore::new());
        let registry = Arc::new(InMemoryContractRegistry::new());
        for venue in ["binance", "okx"] {
            for period in 0..90i64 {
                let wobble = ((period % 7) - 3) as f64 * 1e-6;
                let base = if venue == "binance" { 0.0002 } else { 0.0001 };
                store.append(seed_observation(venue, period * 8 + 1, base + wobble));
            }
            registry.upsert(seed_contract(venue, if venue == "binance" { 0.0002 } else { 0.0001 }));
        }
        RadarEngine::new(EngineConfig::default(), store, registry).unwrap()
    }

    #[tokio::test]
    async fn test_bulk_cycle_publishes_snapshot() {
        let engine = seeded_engine();
        assert_eq!(engine.current_snapshot().version, 0);

        let outcome = engine.run_bulk_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));

        let snapshot = engine.current_snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.pair_stats.len(), 1);
        assert_eq!(snapshot.opportunities.len(), 1);
        assert!(snapshot.opportunities[0].apr_spread > 0.0);
    }

    #[tokio::test]
    async fn test_instrument_tick_populates_statistics() {
        let engine = seeded_engine();
        // all instruments start stable and never computed: slow tick takes
        // every one of them
        let refreshed = engine.run_instrument_tick(TickCadence::Slow).await.unwrap();
        assert_eq!(refreshed, 2);

        let feed = engine.statistics_feed();
        assert_eq!(feed.len(), 2);
        assert!(feed.iter().all(|s| s.data_point_count == 90));
    }

    #[tokio::test]
    async fn test_query_caches_and_paginates() {
        let engine = seeded_engine();
        engine.run_bulk_cycle().await.unwrap();

        let first = engine.query(&OpportunityFilter::default(), SortBy::default(), Page::default());
        assert_eq!(first.total, 1);
        assert!(!first.cache_hit);

        let second = engine.query(&OpportunityFilter::default(), SortBy::default(), Page::default());
        assert!(second.cache_hit);
        assert_eq!(first.items, second.items);
    }

    #[tokio::test]
    async fn test_snapshot_survives_store_outage() {
        struct FlakyStore {
            inner: InMemoryObservationStore,
            fail: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl ObservationStore for FlakyStore {
            async fn observations_in_window(
                &self,
                start: DateTime<Utc>,
                end: DateTime<Utc>,
            ) -> Result<Vec<Observation>, EngineError> {
                if self.fail.load(Ordering::Relaxed) {
                    return Err(EngineError::StoreUnavailable("timeout".into()));
                }
                self.inner.observations_in_window(start, end).await
            }
        }

        let store = Arc::new(FlakyStore {
            inner: InMemoryObservationStore::new(),
            fail: std::sync::atomic::AtomicBool::new(false),
        });
        let registry = Arc::new(InMemoryContractRegistry::new());
        for venue in ["binance", "okx"] {
            for period in 0..40i64 {
                store.inner.append(seed_observation(
                    venue,
                    period * 8 + 1,
                    if venue == "binance" { 0.0002 } else { 0.0001 },
                ));
            }
            registry.upsert(seed_contract(venue, 0.0001));
        }
        let engine = RadarEngine::new(EngineConfig::default(), store.clone(), registry).unwrap();

        engine.run_bulk_cycle().await.unwrap();
        let published = engine.current_snapshot();
        assert_eq!(published.version, 1);

        // store goes down: the cycle is skipped, the old snapshot stays up
        store.fail.store(true, Ordering::Relaxed);
        let result = engine.run_bulk_cycle().await;
        assert!(matches!(result, Err(EngineError::StoreUnavailable(_))));
        assert_eq!(engine.current_snapshot().version, 1);
    }

    #[tokio::test]
    async fn test_overlapping_bulk_triggers_defer() {
        let engine = Arc::new(seeded_engine());

        // hold the guard to simulate an in-flight pass
        let guard = engine.bulk_guard.lock().await;
        let outcome = engine.run_bulk_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Deferred);
        drop(guard);

        let outcome = engine.run_bulk_cycle().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Completed(_)));
        assert_eq!(engine.telemetry().deferred_cycles, 1);
    }
}
