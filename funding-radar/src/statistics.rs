//! Per-instrument rolling statistics with confidence grading.
//!
//! All calculations degrade to `None` under sparse or degenerate input;
//! sparse data is not an error. Missing observations are excluded, never
//! interpolated.

use crate::{
    config::EngineConfig,
    model::{ConfidenceTier, ContractState, ContractStatistics, Zone, annualized_pct},
};
use chrono::{DateTime, Utc};

/// Minimum samples before a standard deviation is defined.
pub const MIN_STD_DEV_SAMPLES: usize = 3;
/// Minimum samples before a percentile rank is defined.
pub const MIN_PERCENTILE_SAMPLES: usize = 5;

/// Rolling summary of a value series.
#[derive(Clone, Debug, PartialEq)]
pub struct RollingStats {
    pub mean: f64,
    /// Sample standard deviation; `None` below [`MIN_STD_DEV_SAMPLES`] or
    /// when the variance collapses below epsilon.
    pub std_dev: Option<f64>,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

/// Compute rolling statistics over a series, ignoring non-finite values.
///
/// Returns `None` for an empty (or all-degenerate) series.
pub fn rolling_stats(values: &[f64], epsilon: f64) -> Option<RollingStats> {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &value in values {
        if !value.is_finite() {
            continue;
        }
        count += 1;
        sum += value;
        min = min.min(value);
        max = max.max(value);
    }
    if count == 0 {
        return None;
    }

    let mean = sum / count as f64;
    let std_dev = if count >= MIN_STD_DEV_SAMPLES {
        let m2: f64 = values
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| (v - mean).powi(2))
            .sum();
        let std = (m2 / (count - 1) as f64).sqrt();
        (std.is_finite() && std > epsilon).then_some(std)
    } else {
        None
    };

    Some(RollingStats {
        mean,
        std_dev,
        min,
        max,
        count,
    })
}

/// Z-score of `current` against a historical distribution.
///
/// `None` if the standard deviation is undefined, the sample count is below
/// [`MIN_STD_DEV_SAMPLES`], or `current` is missing/non-finite.
pub fn z_score(current: Option<f64>, mean: f64, std_dev: Option<f64>, count: usize) -> Option<f64> {
    let current = current.filter(|v| v.is_finite())?;
    let std_dev = std_dev?;
    if count < MIN_STD_DEV_SAMPLES {
        return None;
    }
    let z = (current - mean) / std_dev;
    z.is_finite().then_some(z)
}

/// Midrank percentile of `current` within `values`, 0..=100.
///
/// `None` below [`MIN_PERCENTILE_SAMPLES`] finite samples.
pub fn percentile_rank(values: &[f64], current: f64) -> Option<f64> {
    if !current.is_finite() {
        return None;
    }
    let mut below = 0usize;
    let mut equal = 0usize;
    let mut count = 0usize;
    for &value in values {
        if !value.is_finite() {
            continue;
        }
        count += 1;
        if value < current {
            below += 1;
        } else if value == current {
            equal += 1;
        }
    }
    if count < MIN_PERCENTILE_SAMPLES {
        return None;
    }
    Some(100.0 * (below as f64 + 0.5 * equal as f64) / count as f64)
}

/// Computes the next [`ContractStatistics`] entry for one instrument from
/// its observation window.
#[derive(Debug, Clone)]
pub struct StatisticsCalculator {
    window_hours: f64,
    epsilon: f64,
}

impl StatisticsCalculator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            window_hours: config.window_hours(),
            epsilon: config.std_dev_epsilon,
        }
    }

    /// Expected observation count for an instrument's funding interval over
    /// the lookback window.
    pub fn expected_point_count(&self, interval_hours: f64) -> usize {
        if !interval_hours.is_finite() || interval_hours <= 0.0 {
            return 0;
        }
        (self.window_hours / interval_hours).round() as usize
    }

    /// Produce the statistics entry for `contract` given its windowed APR
    /// series, or `None` when the sample is below the emission threshold
    /// (confidence tier `none`).
    pub fn calculate(
        &self,
        contract: &ContractState,
        apr_series: &[f64],
        zone: Zone,
        computed_at: DateTime<Utc>,
    ) -> Option<ContractStatistics> {
        let stats = rolling_stats(apr_series, self.epsilon)?;
        let confidence = ConfidenceTier::from_count(stats.count);
        if confidence == ConfidenceTier::None {
            return None;
        }

        let current_apr = annualized_pct(contract.current_rate, contract.funding_interval_hours);
        let z = z_score(current_apr, stats.mean, stats.std_dev, stats.count);
        let percentile = current_apr.and_then(|apr| percentile_rank(apr_series, apr));

        let expected = self.expected_point_count(contract.funding_interval_hours);
        let completeness_pct = if expected > 0 {
            (100.0 * stats.count as f64 / expected as f64).min(100.0)
        } else {
            0.0
        };

        Some(ContractStatistics {
            key: contract.key.clone(),
            base_asset: contract.base_asset.clone(),
            mean: stats.mean,
            std_dev: stats.std_dev,
            min: stats.min,
            max: stats.max,
            data_point_count: stats.count,
            expected_point_count: expected,
            completeness_pct,
            confidence,
            z_score: z,
            percentile,
            zone,
            computed_at,
        })
    }
}
