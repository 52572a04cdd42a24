//! Filterable, paginated read surface over published opportunities.
//!
//! Filters canonicalize to a sorted signature string so that equivalent
//! filters (regardless of list ordering) share one cache entry.

use crate::model::ArbitrageOpportunity;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Hard cap on page size.
pub const MAX_PAGE_LIMIT: usize = 500;

/// Filter dimensions of the opportunity query surface.
///
/// List fields are OR-matched within the dimension and AND-combined across
/// dimensions. Venue and interval filters apply to BOTH legs, so results
/// stay executable on the requested venues. Spread bounds apply to the
/// absolute APR spread; the open-interest threshold requires both legs to
/// report at least that much.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct OpportunityFilter {
    pub base_assets: Vec<SmolStr>,
    pub venues: Vec<SmolStr>,
    pub funding_intervals: Vec<f64>,
    pub min_apr_spread: Option<f64>,
    pub max_apr_spread: Option<f64>,
    pub min_open_interest: Option<f64>,
}

impl OpportunityFilter {
    pub fn matches(&self, opportunity: &ArbitrageOpportunity) -> bool {
        if !self.base_assets.is_empty() && !self.base_assets.contains(&opportunity.base_asset) {
            return false;
        }
        if !self.venues.is_empty()
            && !(self.venues.contains(&opportunity.first.key.venue)
                && self.venues.contains(&opportunity.second.key.venue))
        {
            return false;
        }
        if !self.funding_intervals.is_empty()
            && !(self
                .funding_intervals
                .contains(&opportunity.first.funding_interval_hours)
                && self
                    .funding_intervals
                    .contains(&opportunity.second.funding_interval_hours))
        {
            return false;
        }
        let abs_spread = opportunity.apr_spread.abs();
        if let Some(min) = self.min_apr_spread {
            if abs_spread < min {
                return false;
            }
        }
        if let Some(max) = self.max_apr_spread {
            if abs_spread > max {
                return false;
            }
        }
        if let Some(min_oi) = self.min_open_interest {
            let both_meet = [&opportunity.first, &opportunity.second]
                .iter()
                .all(|leg| leg.open_interest.is_some_and(|oi| oi >= min_oi));
            if !both_meet {
                return false;
            }
        }
        true
    }

    /// Deterministic, order-insensitive cache key for this filter + sort.
    pub fn canonical_signature(&self, sort: SortBy) -> String {
        let assets = self.base_assets.iter().sorted().unique().join(",");
        let venues = self.venues.iter().sorted().unique().join(",");
        let intervals = self
            .funding_intervals
            .iter()
            .sorted_by(|a, b| a.total_cmp(*b))
            .dedup()
            .map(|h| format!("{h}"))
            .join(",");
        format!(
            "assets={assets}|venues={venues}|intervals={intervals}|min_spread={}|max_spread={}|min_oi={}|sort={}",
            fmt_bound(self.min_apr_spread),
            fmt_bound(self.max_apr_spread),
            fmt_bound(self.min_open_interest),
            sort.as_str(),
        )
    }
}

fn fmt_bound(bound: Option<f64>) -> String {
    bound.map(|b| format!("{b}")).unwrap_or_default()
}

/// Sort order of the query surface, always descending.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortBy {
    /// By |current APR spread|.
    #[default]
    AbsAprSpread,
    /// By |spread Z-score|; opportunities without a Z-score sort last.
    AbsZScore,
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::AbsAprSpread => "abs-apr-spread",
            SortBy::AbsZScore => "abs-z-score",
        }
    }
}

/// Pagination window.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct QueryResponse {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub cache_hit: bool,
    pub items: Vec<ArbitrageOpportunity>,
}

/// Filter and sort a snapshot's opportunity list (pre-pagination).
pub fn filter_and_sort(
    opportunities: &[ArbitrageOpportunity],
    filter: &OpportunityFilter,
    sort: SortBy,
) -> Vec<ArbitrageOpportunity> {
    let mut matched: Vec<ArbitrageOpportunity> = opportunities
        .iter()
        .filter(|opp| filter.matches(opp))
        .cloned()
        .collect();

    match sort {
        SortBy::AbsAprSpread => {
            matched.sort_by(|a, b| b.apr_spread.abs().total_cmp(&a.apr_spread.abs()));
        }
        SortBy::AbsZScore => {
            matched.sort_by(|a, b| {
                let za = a.spread_z_score.map(f64::abs).unwrap_or(f64::NEG_INFINITY);
                let zb = b.spread_z_score.map(f64::abs).unwrap_or(f64::NEG_INFINITY);
                zb.total_cmp(&za)
            });
        }
    }
    matched
}

/// Slice one page out of a filtered list.
pub fn paginate(matched: Vec<ArbitrageOpportunity>, page: Page, cache_hit: bool) -> QueryResponse {
    let limit = page.limit.clamp(1, MAX_PAGE_LIMIT);
    let total = matched.len();
    let items = matched
        .into_iter()
        .skip(page.offset)
        .take(limit)
        .collect();
    QueryResponse {
        total,
        offset: page.offset,
        limit,
        cache_hit,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfidenceTier, InstrumentKey, OpportunityLeg, PairId};
    use chrono::Utc;

    fn leg(venue: &str, interval: f64, oi: Option<f64>) -> OpportunityLeg {
        OpportunityLeg {
            key: InstrumentKey::new(venue, "BTC-PERP"),
            funding_rate: 0.0001,
            funding_interval_hours: interval,
            apr: 10.95,
            mark_price: None,
            open_interest: oi,
            confidence: ConfidenceTier::Medium,
        }
    }

    fn opportunity(
        asset: &str,
        venue_a: &str,
        venue_b: &str,
        spread: f64,
        z: Option<f64>,
    ) -> ArbitrageOpportunity {
        let first = leg(venue_a, 8.0, Some(2_000_000.0));
        let second = leg(venue_b, 8.0, Some(5_000_000.0));
        ArbitrageOpportunity {
            pair: PairId::new(first.key.clone(), second.key.clone()),
            base_asset: SmolStr::new(asset),
            first,
            second,
            apr_spread: spread,
            spread_z_score: z,
            confidence: ConfidenceTier::Medium,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn test_signature_is_order_insensitive() {
        let a = OpportunityFilter {
            base_assets: vec![SmolStr::new("ETH"), SmolStr::new("BTC")],
            venues: vec![SmolStr::new("okx"), SmolStr::new("binance")],
            ..Default::default()
        };
        let b = OpportunityFilter {
            base_assets: vec![SmolStr::new("BTC"), SmolStr::new("ETH")],
            venues: vec![SmolStr::new("binance"), SmolStr::new("okx")],
            ..Default::default()
        };
        assert_eq!(
            a.canonical_signature(SortBy::default()),
            b.canonical_signature(SortBy::default())
        );
    }

    #[test]
    fn test_signature_distinguishes_sort_and_bounds() {
        let filter = OpportunityFilter::default();
        assert_ne!(
            filter.canonical_signature(SortBy::AbsAprSpread),
            filter.canonical_signature(SortBy::AbsZScore)
        );

        let bounded = OpportunityFilter {
            min_apr_spread: Some(1.0),
            ..Default::default()
        };
        assert_ne!(
            filter.canonical_signature(SortBy::default()),
            bounded.canonical_signature(SortBy::default())
        );
    }

    #[test]
    fn test_filter_dimensions() {
        let opp = opportunity("BTC", "binance", "okx", 2.0, Some(2.5));

        let by_asset = OpportunityFilter {
            base_assets: vec![SmolStr::new("ETH")],
            ..Default::default()
        };
        assert!(!by_asset.matches(&opp));

        // both legs must be on allowed venues
        let one_venue = OpportunityFilter {
            venues: vec![SmolStr::new("binance")],
            ..Default::default()
        };
        assert!(!one_venue.matches(&opp));
        let both_venues = OpportunityFilter {
            venues: vec![SmolStr::new("binance"), SmolStr::new("okx")],
            ..Default::default()
        };
        assert!(both_venues.matches(&opp));

        let spread_window = OpportunityFilter {
            min_apr_spread: Some(1.0),
            max_apr_spread: Some(3.0),
            ..Default::default()
        };
        assert!(spread_window.matches(&opp));
        let too_narrow = OpportunityFilter {
            min_apr_spread: Some(5.0),
            ..Default::default()
        };
        assert!(!too_narrow.matches(&opp));

        let oi_gate = OpportunityFilter {
            min_open_interest: Some(3_000_000.0),
            ..Default::default()
        };
        // first leg only reports 2M
        assert!(!oi_gate.matches(&opp));
    }

    #[test]
    fn test_sort_and_pagination() {
        let opportunities = vec![
            opportunity("BTC", "binance", "okx", -1.0, Some(0.5)),
            opportunity("ETH", "binance", "okx", 3.0, None),
            opportunity("SOL", "binance", "okx", 2.0, Some(4.0)),
        ];

        let by_spread =
            filter_and_sort(&opportunities, &OpportunityFilter::default(), SortBy::AbsAprSpread);
        assert_eq!(by_spread[0].base_asset, "ETH");
        assert_eq!(by_spread[2].base_asset, "BTC");

        // null z sorts last
        let by_z = filter_and_sort(&opportunities, &OpportunityFilter::default(), SortBy::AbsZScore);
        assert_eq!(by_z[0].base_asset, "SOL");
        assert_eq!(by_z[2].base_asset, "ETH");

        let page = paginate(by_spread, Page { offset: 1, limit: 1 }, false);
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].base_asset, "SOL");
    }
}
