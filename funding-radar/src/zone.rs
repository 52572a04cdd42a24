//! Zone-based recompute scheduling.
//!
//! An explicit per-instrument state machine rather than ad hoc polling:
//! `stable -> active` fires immediately when |Z| crosses the threshold;
//! `active -> stable` only after |Z| has stayed below the threshold for one
//! full stable interval (debounce, preventing flapping). Active instruments
//! recompute on the fast tick, stable ones on the slow tick.

use crate::{config::EngineConfig, model::{InstrumentKey, Zone}};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use fnv::FnvHashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct InstrumentSchedule {
    zone: Zone,
    /// When |Z| last dropped below the threshold while active.
    below_since: Option<DateTime<Utc>>,
    last_computed: Option<DateTime<Utc>>,
}

/// Per-instrument zone state machine and recompute due-ness tracker.
#[derive(Debug, Clone)]
pub struct ZoneScheduler {
    threshold: f64,
    fast_tick: ChronoDuration,
    slow_tick: ChronoDuration,
    schedules: FnvHashMap<InstrumentKey, InstrumentSchedule>,
}

impl ZoneScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            threshold: config.zone_threshold,
            fast_tick: ChronoDuration::from_std(config.fast_tick)
                .unwrap_or_else(|_| ChronoDuration::seconds(30)),
            slow_tick: ChronoDuration::from_std(config.slow_tick)
                .unwrap_or_else(|_| ChronoDuration::seconds(120)),
            schedules: FnvHashMap::default(),
        }
    }

    /// Feed the latest Z-score for an instrument and return its zone after
    /// applying transition rules. A null Z counts as below threshold.
    pub fn observe(&mut self, key: &InstrumentKey, z: Option<f64>, now: DateTime<Utc>) -> Zone {
        let schedule = self.schedules.entry(key.clone()).or_default();
        let below = z.map(|z| z.abs() < self.threshold).unwrap_or(true);

        match (schedule.zone, below) {
            (Zone::Stable, false) => {
                debug!(instrument = %key, z = ?z, "zone promoted to active");
                schedule.zone = Zone::Active;
                schedule.below_since = None;
            }
            (Zone::Active, false) => {
                // still hot: restart the debounce clock
                schedule.below_since = None;
            }
            (Zone::Active, true) => match schedule.below_since {
                None => schedule.below_since = Some(now),
                Some(since) if now - since >= self.slow_tick => {
                    debug!(instrument = %key, "zone demoted to stable after debounce");
                    schedule.zone = Zone::Stable;
                    schedule.below_since = None;
                }
                Some(_) => {}
            },
            (Zone::Stable, true) => {}
        }
        schedule.zone
    }

    /// Current zone of an instrument (stable if never observed).
    pub fn zone(&self, key: &InstrumentKey) -> Zone {
        self.schedules.get(key).map(|s| s.zone).unwrap_or_default()
    }

    /// Whether an instrument is due a statistics recompute at `now` under
    /// its zone's cadence. Instruments never computed are always due.
    pub fn is_due(&self, key: &InstrumentKey, now: DateTime<Utc>) -> bool {
        let Some(schedule) = self.schedules.get(key) else {
            return true;
        };
        let Some(last) = schedule.last_computed else {
            return true;
        };
        let cadence = match schedule.zone {
            Zone::Active => self.fast_tick,
            Zone::Stable => self.slow_tick,
        };
        now - last >= cadence
    }

    pub fn mark_computed(&mut self, key: &InstrumentKey, now: DateTime<Utc>) {
        self.schedules.entry(key.clone()).or_default().last_computed = Some(now);
    }

    /// Drop instruments that have left the live universe.
    pub fn retain<F>(&mut self, keep: F)
    where
        F: Fn(&InstrumentKey) -> bool,
    {
        self.schedules.retain(|key, _| keep(key));
    }
}
