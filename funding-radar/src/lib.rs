//! # Funding Radar
//! Cross-venue funding rate statistics and arbitrage opportunity detection.
//!
//! Given periodic funding observations for thousands of instruments across
//! many venues, the engine:
//! - maintains rolling per-instrument statistics (mean, stddev, Z-score,
//!   percentile) with confidence grading under sparse sampling,
//! - pairs instruments tracking the same underlying asset across venues and
//!   grades each pair's interval-normalized spread against its own history,
//! - serves the result through a TTL-cached, filterable query surface.
//!
//! Historical spread statistics for the whole pair universe are rebuilt in
//! a single bulk aggregation pass per cycle ([`spread::SpreadStatisticsEngine`]);
//! per-pair historical queries are a regression against that design.
//! Published state is an immutable, versioned snapshot swapped atomically
//! ([`snapshot::SnapshotHandle`]), and per-instrument recompute cadence is
//! gated by an explicit zone state machine ([`zone::ZoneScheduler`]).

/// TTL-bound, filter-aware cache of computed opportunity lists.
pub mod cache;

/// Engine configuration with environment overrides.
pub mod config;

/// Cycle orchestration, single-flight guard and telemetry.
pub mod engine;

/// All errors generated in `funding-radar`.
pub mod error;

/// Core data model: observations, contracts, pairs, opportunities.
pub mod model;

/// Cross-venue pair enumeration and interval alignment.
pub mod pairing;

/// Filter, sort and pagination of the query surface.
pub mod query;

/// Versioned, atomically-swapped engine snapshots.
pub mod snapshot;

/// Bulk pair-spread aggregation.
pub mod spread;

/// Per-instrument rolling statistics with confidence grading.
pub mod statistics;

/// Boundary traits for the observation store and contract registry.
pub mod store;

/// Zone-based recompute scheduling.
pub mod zone;

pub use cache::{CacheBackend, CachedEntry, InMemoryCacheBackend, ResultCache};
pub use config::EngineConfig;
pub use engine::{CycleOutcome, CycleTelemetry, RadarEngine, TickCadence};
pub use error::{CacheError, EngineError};
pub use model::{
    ArbitrageOpportunity, ConfidenceTier, ContractState, ContractStatistics, InstrumentKey,
    Observation, OpportunityLeg, PairId, PairSpreadStatistics, Zone,
};
pub use pairing::{CandidatePair, PairMatcher};
pub use query::{OpportunityFilter, Page, QueryResponse, SortBy};
pub use snapshot::{EngineSnapshot, SnapshotHandle};
pub use spread::{SpreadComputation, SpreadStatisticsEngine};
pub use statistics::StatisticsCalculator;
pub use store::{
    ContractRegistry, InMemoryContractRegistry, InMemoryObservationStore, ObservationStore,
};
pub use zone::ZoneScheduler;
