//! Engine configuration with environment variable overrides.

use crate::error::EngineError;
use std::time::Duration;

/// Tunable parameters for the radar engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lookback window for all historical statistics, in days.
    pub window_days: u32,
    /// Recompute cadence for active-zone instruments.
    pub fast_tick: Duration,
    /// Recompute cadence for stable-zone instruments. Also the debounce
    /// period an active instrument must stay quiet before downgrading.
    pub slow_tick: Duration,
    /// Cadence of the bulk pair-spread aggregation pass.
    pub bulk_cadence: Duration,
    /// |Z| threshold that promotes an instrument into the active zone.
    pub zone_threshold: f64,
    /// Minimum aligned samples before a pair gets a spread Z-score.
    pub min_pair_samples: usize,
    /// Standard deviations below this are treated as undefined.
    pub std_dev_epsilon: f64,
    /// TTL of cached query results. Matched to the statistics cycle.
    pub cache_ttl: Duration,
    /// Contracts not updated within this many seconds are considered stale.
    pub staleness_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_days: 30,
            fast_tick: Duration::from_secs(30),
            slow_tick: Duration::from_secs(120),
            bulk_cadence: Duration::from_secs(30),
            zone_threshold: 2.0,
            min_pair_samples: 30,
            std_dev_epsilon: 1e-9,
            cache_ttl: Duration::from_secs(10),
            staleness_secs: 30 * 60,
        }
    }
}

impl EngineConfig {
    /// Default configuration with any `RADAR_*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(days) = env_parse::<u32>("RADAR_WINDOW_DAYS") {
            config.window_days = days;
        }
        if let Some(secs) = env_parse::<u64>("RADAR_FAST_TICK_SECS") {
            config.fast_tick = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RADAR_SLOW_TICK_SECS") {
            config.slow_tick = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>("RADAR_BULK_CADENCE_SECS") {
            config.bulk_cadence = Duration::from_secs(secs);
        }
        if let Some(threshold) = env_parse::<f64>("RADAR_ZONE_THRESHOLD") {
            config.zone_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("RADAR_CACHE_TTL_SECS") {
            config.cache_ttl = Duration::from_secs(secs);
        }
        config
    }

    pub fn with_window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    pub fn with_fast_tick(mut self, tick: Duration) -> Self {
        self.fast_tick = tick;
        self
    }

    pub fn with_slow_tick(mut self, tick: Duration) -> Self {
        self.slow_tick = tick;
        self
    }

    pub fn with_zone_threshold(mut self, threshold: f64) -> Self {
        self.zone_threshold = threshold;
        self
    }

    pub fn with_min_pair_samples(mut self, samples: usize) -> Self {
        self.min_pair_samples = samples;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Lookback window length in hours.
    pub fn window_hours(&self) -> f64 {
        f64::from(self.window_days) * 24.0
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.window_days == 0 {
            return Err(EngineError::InvalidConfig("window_days must be > 0".into()));
        }
        if self.fast_tick.is_zero() || self.slow_tick.is_zero() {
            return Err(EngineError::InvalidConfig("tick durations must be > 0".into()));
        }
        if self.fast_tick > self.slow_tick {
            return Err(EngineError::InvalidConfig(
                "fast_tick must not exceed slow_tick".into(),
            ));
        }
        if !(self.zone_threshold.is_finite() && self.zone_threshold > 0.0) {
            return Err(EngineError::InvalidConfig(
                "zone_threshold must be finite and > 0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_window_hours() {
        let config = EngineConfig::default().with_window_days(30);
        assert_eq!(config.window_hours(), 720.0);
    }

    #[test]
    fn test_invalid_tick_ordering_rejected() {
        let config = EngineConfig::default()
            .with_fast_tick(Duration::from_secs(300))
            .with_slow_tick(Duration::from_secs(60));
        assert!(config.validate().is_err());
    }
}
