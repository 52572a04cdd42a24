//! Boundary traits for the observation store and contract registry, with
//! in-memory implementations.
//!
//! Venue clients, persistence schema and the collection scheduler live
//! outside this crate; the engine only ever pulls "observations over the
//! last N days" and "the current live contract universe" through these
//! traits.

use crate::{
    error::EngineError,
    model::{ContractState, InstrumentKey, Observation},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use parking_lot::RwLock;

/// Read-only, time-indexed funding observation source.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// All observations with `start <= time < end`, any instrument order.
    async fn observations_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, EngineError>;
}

/// Current per-instrument snapshot source, upserted by the external
/// collector.
#[async_trait]
pub trait ContractRegistry: Send + Sync {
    async fn live_contracts(&self) -> Result<Vec<ContractState>, EngineError>;
}

/// In-memory observation store. Append-only.
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    observations: RwLock<Vec<Observation>>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, observation: Observation) {
        self.observations.write().push(observation);
    }

    pub fn extend(&self, observations: impl IntoIterator<Item = Observation>) {
        self.observations.write().extend(observations);
    }

    pub fn len(&self) -> usize {
        self.observations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.read().is_empty()
    }
}

#[async_trait]
impl ObservationStore for InMemoryObservationStore {
    async fn observations_in_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Observation>, EngineError> {
        Ok(self
            .observations
            .read()
            .iter()
            .filter(|obs| obs.time >= start && obs.time < end)
            .cloned()
            .collect())
    }
}

/// In-memory contract registry keyed by instrument.
#[derive(Debug, Default)]
pub struct InMemoryContractRegistry {
    contracts: RwLock<FnvHashMap<InstrumentKey, ContractState>>,
}

impl InMemoryContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, contract: ContractState) {
        self.contracts.write().insert(contract.key.clone(), contract);
    }

    pub fn len(&self) -> usize {
        self.contracts.read().len()
    }
}

#[async_trait]
impl ContractRegistry for InMemoryContractRegistry {
    async fn live_contracts(&self) -> Result<Vec<ContractState>, EngineError> {
        Ok(self.contracts.read().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use smol_str::SmolStr;

    fn observation(hours_offset: i64) -> Observation {
        Observation {
            venue: SmolStr::new("binance"),
            symbol: SmolStr::new("BTCUSDT"),
            base_asset: SmolStr::new("BTC"),
            quote_asset: SmolStr::new("USDT"),
            time: Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
                + chrono::Duration::hours(hours_offset),
            funding_rate: 0.0001,
            funding_interval_hours: 8.0,
            mark_price: None,
            open_interest: None,
        }
    }

    #[tokio::test]
    async fn test_window_query_is_half_open() {
        let store = InMemoryObservationStore::new();
        store.extend((0..10).map(|i| observation(i * 8)));

        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 6, 2, 0, 0, 0).unwrap();
        let window = store.observations_in_window(start, end).await.unwrap();

        // observations at +8h and +16h fall inside [start, end)
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_upsert_replaces() {
        let registry = InMemoryContractRegistry::new();
        let key = InstrumentKey::new("binance", "BTCUSDT");
        registry.upsert(ContractState {
            key: key.clone(),
            base_asset: SmolStr::new("BTC"),
            quote_asset: SmolStr::new("USDT"),
            current_rate: 0.0001,
            funding_interval_hours: 8.0,
            mark_price: None,
            open_interest: None,
            last_updated: Utc::now(),
            is_stale: false,
        });
        registry.upsert(ContractState {
            key: key.clone(),
            base_asset: SmolStr::new("BTC"),
            quote_asset: SmolStr::new("USDT"),
            current_rate: 0.0005,
            funding_interval_hours: 8.0,
            mark_price: None,
            open_interest: None,
            last_updated: Utc::now(),
            is_stale: false,
        });

        let contracts = registry.live_contracts().await.unwrap();
        assert_eq!(contracts.len(), 1);
        assert_eq!(contracts[0].current_rate, 0.0005);
    }
}
