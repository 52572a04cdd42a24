//! Cross-venue pair enumeration and interval alignment.
//!
//! Stale and inactive instruments are dropped BEFORE pairing: unfiltered
//! enumeration is O(assets x venues^2) and dominates combinatorial cost.
//!
//! Spread sign convention: spread = first-leg APR minus second-leg APR,
//! where legs are in canonical [`PairId`] order. Spread history is signed.

use crate::model::{ContractState, InstrumentKey, PairId};
use fnv::FnvHashMap;
use itertools::Itertools;
use smol_str::SmolStr;

/// A live cross-venue pair with its current interval-normalized spread.
///
/// Legs are in canonical [`PairId`] order.
#[derive(Clone, Debug, PartialEq)]
pub struct CandidatePair {
    pub pair: PairId,
    pub base_asset: SmolStr,
    pub first: ContractState,
    pub second: ContractState,
    /// Signed spread: first-leg APR minus second-leg APR.
    pub apr_spread: f64,
    /// Alignment bucket for this pair's spread history, in seconds.
    pub bucket_secs: i64,
}

/// Alignment bucket for two funding intervals: the coarser of the two,
/// in seconds.
pub fn alignment_bucket_secs(interval_a_hours: f64, interval_b_hours: f64) -> i64 {
    let hours = interval_a_hours.max(interval_b_hours).max(1.0);
    (hours * 3600.0).round() as i64
}

/// Collapse a sorted `(epoch_secs, value)` series onto alignment buckets,
/// keeping the last observation per bucket.
pub(crate) fn bucketed_series(series: &[(i64, f64)], bucket_secs: i64) -> Vec<(i64, f64)> {
    let mut out: Vec<(i64, f64)> = Vec::with_capacity(series.len());
    for &(ts, value) in series {
        let bucket = ts.div_euclid(bucket_secs);
        match out.last_mut() {
            Some(last) if last.0 == bucket => last.1 = value,
            _ => out.push((bucket, value)),
        }
    }
    out
}

/// Walk two bucketed series along their shared alignment timeline, visiting
/// each bucket where both legs have a value.
///
/// A leg's value at bucket `k` is its own observation in `k`, or its last
/// known value forward-filled from bucket `k - 1`. Values are never
/// interpolated and never pulled from a future bucket.
pub(crate) fn for_each_aligned<F>(a: &[(i64, f64)], b: &[(i64, f64)], mut visit: F)
where
    F: FnMut(f64, f64),
{
    let (mut i, mut j) = (0usize, 0usize);
    let mut last_a: Option<(i64, f64)> = None;
    let mut last_b: Option<(i64, f64)> = None;

    while i < a.len() || j < b.len() {
        let next_a = a.get(i).map(|entry| entry.0);
        let next_b = b.get(j).map(|entry| entry.0);
        let bucket = match (next_a, next_b) {
            (Some(ka), Some(kb)) => ka.min(kb),
            (Some(ka), None) => ka,
            (None, Some(kb)) => kb,
            (None, None) => break,
        };
        if next_a == Some(bucket) {
            last_a = Some(a[i]);
            i += 1;
        }
        if next_b == Some(bucket) {
            last_b = Some(b[j]);
            j += 1;
        }

        let value_a = leg_value(last_a, bucket);
        let value_b = leg_value(last_b, bucket);
        if let (Some(va), Some(vb)) = (value_a, value_b) {
            visit(va, vb);
        }
    }
}

fn leg_value(last: Option<(i64, f64)>, bucket: i64) -> Option<f64> {
    last.and_then(|(idx, value)| (idx == bucket || idx == bucket - 1).then_some(value))
}

/// Enumerates live cross-venue pairs grouped by underlying asset.
#[derive(Debug, Clone, Default)]
pub struct PairMatcher;

impl PairMatcher {
    pub fn new() -> Self {
        Self
    }

    /// All unordered cross-venue pairs among live contracts tracking the
    /// same base asset. Never yields both (A,B) and (B,A).
    pub fn candidate_pairs(&self, contracts: &[ContractState]) -> Vec<CandidatePair> {
        // Stale/inactive contracts are dropped before any pairing.
        let mut by_asset: FnvHashMap<SmolStr, Vec<&ContractState>> = FnvHashMap::default();
        for contract in contracts.iter().filter(|c| c.is_live()) {
            by_asset
                .entry(contract.base_asset.clone())
                .or_default()
                .push(contract);
        }

        let mut pairs = Vec::new();
        for (asset, group) in by_asset {
            let distinct_venues = group.iter().map(|c| &c.key.venue).unique().count();
            if distinct_venues < 2 {
                continue;
            }
            for (a, b) in group.iter().tuple_combinations() {
                if a.key.venue == b.key.venue {
                    continue;
                }
                if let Some(pair) = self.build_pair(&asset, a, b) {
                    pairs.push(pair);
                }
            }
        }
        pairs
    }

    fn build_pair(
        &self,
        asset: &SmolStr,
        a: &ContractState,
        b: &ContractState,
    ) -> Option<CandidatePair> {
        let pair = PairId::new(a.key.clone(), b.key.clone());
        let (first, second) = if pair.first == a.key { (a, b) } else { (b, a) };

        let apr_first = first.current_apr()?;
        let apr_second = second.current_apr()?;
        let bucket_secs =
            alignment_bucket_secs(first.funding_interval_hours, second.funding_interval_hours);

        Some(CandidatePair {
            pair,
            base_asset: asset.clone(),
            first: first.clone(),
            second: second.clone(),
            apr_spread: apr_first - apr_second,
            bucket_secs,
        })
    }
}

/// Group live contracts by base asset, keyed by instrument.
pub(crate) fn live_contracts_by_key(
    contracts: &[ContractState],
) -> FnvHashMap<InstrumentKey, &ContractState> {
    contracts
        .iter()
        .filter(|c| c.is_live())
        .map(|c| (c.key.clone(), c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn contract(venue: &str, symbol: &str, asset: &str, rate: f64, interval: f64) -> ContractState {
        ContractState {
            key: InstrumentKey::new(venue, symbol),
            base_asset: SmolStr::new(asset),
            quote_asset: SmolStr::new("USDT"),
            current_rate: rate,
            funding_interval_hours: interval,
            mark_price: None,
            open_interest: None,
            last_updated: Utc::now(),
            is_stale: false,
        }
    }

    #[test]
    fn test_stale_contracts_excluded_before_pairing() {
        let mut stale = contract("okx", "BTC-USDT-SWAP", "BTC", 0.0001, 8.0);
        stale.is_stale = true;
        let contracts = vec![
            contract("binance", "BTCUSDT", "BTC", 0.0001, 8.0),
            stale,
            contract("bybit", "BTCUSDT", "BTC", 0.0002, 8.0),
        ];

        let pairs = PairMatcher::new().candidate_pairs(&contracts);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].pair.first.venue, "binance");
        assert_eq!(pairs[0].pair.second.venue, "bybit");
    }

    #[test]
    fn test_same_venue_instruments_never_paired() {
        let contracts = vec![
            contract("binance", "BTCUSDT", "BTC", 0.0001, 8.0),
            contract("binance", "BTCUSDC", "BTC", 0.0002, 8.0),
        ];
        assert!(PairMatcher::new().candidate_pairs(&contracts).is_empty());
    }

    #[test]
    fn test_three_venues_yield_three_pairs() {
        let contracts = vec![
            contract("binance", "BTCUSDT", "BTC", 0.0001, 8.0),
            contract("bybit", "BTCUSDT", "BTC", 0.0002, 8.0),
            contract("okx", "BTC-USDT-SWAP", "BTC", 0.0003, 4.0),
        ];
        let pairs = PairMatcher::new().candidate_pairs(&contracts);
        assert_eq!(pairs.len(), 3);

        // no duplicate orderings
        let mut ids: Vec<_> = pairs.iter().map(|p| p.pair.clone()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_spread_sign_follows_canonical_order() {
        let a = contract("binance", "BTCUSDT", "BTC", 0.0002, 8.0);
        let b = contract("bybit", "BTCUSDT", "BTC", 0.0001, 8.0);
        let pairs = PairMatcher::new().candidate_pairs(&[b, a]);
        assert_eq!(pairs.len(), 1);

        // binance sorts before bybit, so spread = apr(binance) - apr(bybit) > 0
        let expected = (0.0002 - 0.0001) * (8760.0 / 8.0) * 100.0;
        assert!((pairs[0].apr_spread - expected).abs() < 1e-9);
    }

    #[test]
    fn test_alignment_bucket_uses_coarser_interval() {
        assert_eq!(alignment_bucket_secs(8.0, 4.0), 8 * 3600);
        assert_eq!(alignment_bucket_secs(1.0, 8.0), 8 * 3600);
        assert_eq!(alignment_bucket_secs(8.0, 8.0), 8 * 3600);
    }

    #[test]
    fn test_bucketed_series_keeps_last_per_bucket() {
        let bucket = 8 * 3600;
        let series = vec![(0, 1.0), (3600, 2.0), (bucket, 3.0)];
        let bucketed = bucketed_series(&series, bucket);
        assert_eq!(bucketed, vec![(0, 2.0), (1, 3.0)]);
    }

    #[test]
    fn test_alignment_forward_fills_one_bucket_only() {
        let bucket = 8 * 3600;
        // a: observations in buckets 0, 1, 2, 3; b: buckets 0 and 3 only.
        let a = bucketed_series(
            &[(0, 10.0), (bucket, 11.0), (2 * bucket, 12.0), (3 * bucket, 13.0)],
            bucket,
        );
        let b = bucketed_series(&[(100, 20.0), (3 * bucket + 100, 23.0)], bucket);

        let mut samples = Vec::new();
        for_each_aligned(&a, &b, |va, vb| samples.push((va, vb)));

        // bucket 0: both present; bucket 1: b forward-filled from bucket 0;
        // bucket 2: b's last value is two buckets old, no sample;
        // bucket 3: both present.
        assert_eq!(samples, vec![(10.0, 20.0), (11.0, 20.0), (13.0, 23.0)]);
    }

    #[test]
    fn test_alignment_never_backfills_from_future() {
        let bucket = 8 * 3600;
        // b only has an observation in bucket 2: buckets 0 and 1 must not
        // see it.
        let a = bucketed_series(&[(0, 1.0), (bucket, 2.0), (2 * bucket, 3.0)], bucket);
        let b = bucketed_series(&[(2 * bucket, 9.0)], bucket);

        let mut samples = Vec::new();
        for_each_aligned(&a, &b, |va, vb| samples.push((va, vb)));
        assert_eq!(samples, vec![(3.0, 9.0)]);
    }
}
