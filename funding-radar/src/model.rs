//! Core data model for funding rate statistics and cross-venue pairing.
//!
//! All rate statistics operate on annualized percentage rates (APR) so that
//! instruments with different funding intervals are directly comparable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Hours in a (non-leap) year, used to annualize periodic funding rates.
pub const HOURS_PER_YEAR: f64 = 8760.0;

/// Annualize a periodic funding rate into an APR percentage.
///
/// `apr = rate * (8760 / interval_hours) * 100`. Returns `None` for a
/// non-positive interval or non-finite rate.
pub fn annualized_pct(rate: f64, interval_hours: f64) -> Option<f64> {
    if !rate.is_finite() || !interval_hours.is_finite() || interval_hours <= 0.0 {
        return None;
    }
    Some(rate * (HOURS_PER_YEAR / interval_hours) * 100.0)
}

/// Unique identity of an instrument: the venue it trades on plus its
/// venue-local symbol.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[display("{venue}:{symbol}")]
pub struct InstrumentKey {
    pub venue: SmolStr,
    pub symbol: SmolStr,
}

impl InstrumentKey {
    pub fn new(venue: impl Into<SmolStr>, symbol: impl Into<SmolStr>) -> Self {
        Self {
            venue: venue.into(),
            symbol: symbol.into(),
        }
    }
}

/// A single funding payment observation. Append-only per instrument.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Observation {
    pub venue: SmolStr,
    pub symbol: SmolStr,
    pub base_asset: SmolStr,
    pub quote_asset: SmolStr,
    pub time: DateTime<Utc>,
    pub funding_rate: f64,
    pub funding_interval_hours: f64,
    pub mark_price: Option<f64>,
    pub open_interest: Option<f64>,
}

impl Observation {
    pub fn key(&self) -> InstrumentKey {
        InstrumentKey::new(self.venue.clone(), self.symbol.clone())
    }
}

/// Latest live snapshot of an instrument, upserted each collection cycle by
/// the external collector.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContractState {
    pub key: InstrumentKey,
    pub base_asset: SmolStr,
    pub quote_asset: SmolStr,
    pub current_rate: f64,
    pub funding_interval_hours: f64,
    pub mark_price: Option<f64>,
    pub open_interest: Option<f64>,
    pub last_updated: DateTime<Utc>,
    pub is_stale: bool,
}

impl ContractState {
    /// Current annualized rate, if the contract carries a usable rate.
    pub fn current_apr(&self) -> Option<f64> {
        annualized_pct(self.current_rate, self.funding_interval_hours)
    }

    /// A contract is pairable when it is live and carries a usable rate.
    pub fn is_live(&self) -> bool {
        !self.is_stale && self.current_apr().is_some()
    }
}

/// Qualitative reliability of a statistic, derived purely from sample size.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum ConfidenceTier {
    /// Fewer than 10 samples: no statistics are emitted at all.
    #[default]
    None,
    /// 10..=29 samples.
    Low,
    /// 30..=89 samples.
    Medium,
    /// 90..=179 samples.
    High,
    /// 180+ samples.
    VeryHigh,
}

impl ConfidenceTier {
    pub fn from_count(count: usize) -> Self {
        match count {
            0..=9 => ConfidenceTier::None,
            10..=29 => ConfidenceTier::Low,
            30..=89 => ConfidenceTier::Medium,
            90..=179 => ConfidenceTier::High,
            _ => ConfidenceTier::VeryHigh,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::None => "none",
            ConfidenceTier::Low => "low",
            ConfidenceTier::Medium => "medium",
            ConfidenceTier::High => "high",
            ConfidenceTier::VeryHigh => "very-high",
        }
    }
}

/// Scheduling classification controlling per-instrument recompute cadence.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    /// |Z| recently crossed the activation threshold: fast recompute tick.
    Active,
    /// Statistically quiet: slow recompute tick.
    #[default]
    Stable,
}

/// Rolling per-instrument statistics over the lookback window.
///
/// `std_dev`, `z_score` and `percentile` are `None` whenever their
/// denominator is undefined or the sample is too small, never NaN.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ContractStatistics {
    pub key: InstrumentKey,
    pub base_asset: SmolStr,
    pub mean: f64,
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub data_point_count: usize,
    pub expected_point_count: usize,
    pub completeness_pct: f64,
    pub confidence: ConfidenceTier,
    pub z_score: Option<f64>,
    pub percentile: Option<f64>,
    pub zone: Zone,
    pub computed_at: DateTime<Utc>,
}

/// Order-independent identity of a cross-venue instrument pair.
///
/// Legs are stored in canonical order (lexicographic by venue, then symbol)
/// so that `PairId::new(a, b) == PairId::new(b, a)`. The spread sign
/// convention follows this ordering: spread = first-leg APR minus second-leg
/// APR, applied uniformly to live spreads and spread history.
#[derive(
    Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, derive_more::Display,
)]
#[display("{first}<>{second}")]
pub struct PairId {
    pub first: InstrumentKey,
    pub second: InstrumentKey,
}

impl PairId {
    pub fn new(a: InstrumentKey, b: InstrumentKey) -> Self {
        if a <= b {
            Self { first: a, second: b }
        } else {
            Self { first: b, second: a }
        }
    }
}

/// Historical distribution of a pair's interval-normalized spread.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct PairSpreadStatistics {
    pub pair: PairId,
    pub mean_spread: f64,
    pub std_dev_spread: Option<f64>,
    pub data_point_count: usize,
}

/// One leg of an arbitrage opportunity with its live per-side metrics.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OpportunityLeg {
    pub key: InstrumentKey,
    pub funding_rate: f64,
    pub funding_interval_hours: f64,
    pub apr: f64,
    pub mark_price: Option<f64>,
    pub open_interest: Option<f64>,
    pub confidence: ConfidenceTier,
}

/// A cross-venue funding rate spread opportunity: the engine's output record.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ArbitrageOpportunity {
    pub pair: PairId,
    pub base_asset: SmolStr,
    pub first: OpportunityLeg,
    pub second: OpportunityLeg,
    /// Signed current spread: first-leg APR minus second-leg APR.
    pub apr_spread: f64,
    /// Z-score of the current spread against the pair's own history;
    /// `None` below the minimum aligned sample count.
    pub spread_z_score: Option<f64>,
    /// Confidence in the spread statistics, from the aligned sample count.
    pub confidence: ConfidenceTier,
    pub computed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_tier_from_count() {
        struct TestCase {
            input: usize,
            expected: ConfidenceTier,
        }

        let tests = vec![
            TestCase {
                // TC0: below emission threshold
                input: 5,
                expected: ConfidenceTier::None,
            },
            TestCase {
                // TC1: lower boundary of low
                input: 10,
                expected: ConfidenceTier::Low,
            },
            TestCase {
                // TC2: mid medium
                input: 45,
                expected: ConfidenceTier::Medium,
            },
            TestCase {
                // TC3: mid high
                input: 150,
                expected: ConfidenceTier::High,
            },
            TestCase {
                // TC4: lower boundary of very-high
                input: 180,
                expected: ConfidenceTier::VeryHigh,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(
                ConfidenceTier::from_count(test.input),
                test.expected,
                "TC{} failed",
                index
            );
        }
    }

    #[test]
    fn test_pair_id_is_order_independent() {
        let a = InstrumentKey::new("binance", "BTCUSDT");
        let b = InstrumentKey::new("okx", "BTC-USDT-SWAP");

        let ab = PairId::new(a.clone(), b.clone());
        let ba = PairId::new(b, a);

        assert_eq!(ab, ba);
        assert_eq!(ab.first.venue, "binance");
        assert_eq!(ab.second.venue, "okx");
    }

    #[test]
    fn test_confidence_tier_wire_format() {
        // monitoring consumers rely on the kebab-case labels
        assert_eq!(
            serde_json::to_string(&ConfidenceTier::VeryHigh).unwrap(),
            "\"very-high\""
        );
        assert_eq!(serde_json::to_string(&ConfidenceTier::None).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::from_str::<ConfidenceTier>("\"medium\"").unwrap(),
            ConfidenceTier::Medium
        );
    }

    #[test]
    fn test_annualized_pct() {
        // 0.01% per 8h -> 0.0001 * (8760 / 8) * 100 = 10.95% APR
        let apr = annualized_pct(0.0001, 8.0).unwrap();
        assert!((apr - 10.95).abs() < 1e-9);

        assert_eq!(annualized_pct(0.0001, 0.0), None);
        assert_eq!(annualized_pct(f64::NAN, 8.0), None);
    }
}
