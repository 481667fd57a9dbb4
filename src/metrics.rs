use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::models::{
    Deal, Factor, FlaggedDeal, MomentumStatus, SegmentStats, VelocitySummary, Warning,
};

/// Latest close date across closed deals; every rolling window is anchored here
/// rather than on the wall clock.
pub fn snapshot_date(deals: &[Deal]) -> Option<NaiveDate> {
    deals
        .iter()
        .filter(|deal| deal.is_closed())
        .filter_map(|deal| deal.closed_date)
        .max()
}

/// Amount generated per day of sales cycle. `Err` carries the flag for a deal
/// whose cycle length is zero or negative; open deals have no score.
pub fn velocity_score(deal: &Deal) -> Option<Result<f64, Warning>> {
    if !deal.is_closed() {
        return None;
    }
    let cycle_days = deal.cycle_days()?;
    if cycle_days <= 0 {
        return Some(Err(Warning::NonPositiveCycle { cycle_days }));
    }
    Some(Ok(deal.amount / cycle_days as f64))
}

pub fn summarize_velocity(deals: &[Deal]) -> VelocitySummary {
    let mut scored_deals = 0usize;
    let mut flagged_deals = Vec::new();
    let mut won_total = 0.0;
    let mut won_count = 0usize;
    let mut by_industry: BTreeMap<&str, (f64, usize)> = BTreeMap::new();

    for deal in deals {
        match velocity_score(deal) {
            Some(Ok(velocity)) => {
                scored_deals += 1;
                if deal.is_won() {
                    won_total += velocity;
                    won_count += 1;
                    let entry = by_industry.entry(deal.industry.as_str()).or_insert((0.0, 0));
                    entry.0 += velocity;
                    entry.1 += 1;
                }
            }
            Some(Err(warning)) => {
                warn!(deal_id = %deal.id, %warning, "excluding deal from velocity aggregates");
                flagged_deals.push(FlaggedDeal {
                    deal_id: deal.id.clone(),
                    warning,
                });
            }
            None => {}
        }
    }

    let avg_won_velocity = (won_count > 0).then(|| won_total / won_count as f64);

    // Ties keep the alphabetically first industry.
    let mut top_industry: Option<(String, f64)> = None;
    for (industry, (total, count)) in by_industry {
        let avg = total / count as f64;
        if top_industry.as_ref().map_or(true, |(_, best)| avg > *best) {
            top_industry = Some((industry.to_string(), avg));
        }
    }

    VelocitySummary {
        scored_deals,
        flagged_deals,
        avg_won_velocity,
        top_industry,
    }
}

/// Win/loss performance per value of `factor` over closed deals, ordered by value.
/// `vs_overall_pp` compares each segment with the win rate of all closed deals.
pub fn segment_performance(deals: &[Deal], factor: Factor) -> Vec<SegmentStats> {
    #[derive(Default)]
    struct Acc {
        count: usize,
        won: usize,
        amount: f64,
        won_revenue: f64,
        velocity_total: f64,
        velocity_count: usize,
    }

    let mut map: BTreeMap<&str, Acc> = BTreeMap::new();
    for deal in deals.iter().filter(|deal| deal.is_closed()) {
        let entry = map.entry(deal.factor_value(factor)).or_default();
        entry.count += 1;
        entry.amount += deal.amount;
        if deal.is_won() {
            entry.won += 1;
            entry.won_revenue += deal.amount;
            if let Some(Ok(velocity)) = velocity_score(deal) {
                entry.velocity_total += velocity;
                entry.velocity_count += 1;
            }
        }
    }

    let total: usize = map.values().map(|acc| acc.count).sum();
    let total_won: usize = map.values().map(|acc| acc.won).sum();
    let overall = if total > 0 {
        total_won as f64 / total as f64
    } else {
        0.0
    };

    map.into_iter()
        .map(|(value, acc)| SegmentStats {
            value: value.to_string(),
            deal_count: acc.count,
            won_count: acc.won,
            win_rate: acc.won as f64 / acc.count as f64,
            vs_overall_pp: (acc.won as f64 / acc.count as f64 - overall) * 100.0,
            avg_amount: acc.amount / acc.count as f64,
            won_revenue: acc.won_revenue,
            avg_won_velocity: (acc.velocity_count > 0)
                .then(|| acc.velocity_total / acc.velocity_count as f64),
        })
        .collect()
}

/// Closed deals and win rate inside the `days` window ending at `anchor`.
pub fn window_win_rate(deals: &[&Deal], anchor: NaiveDate, days: i64) -> (usize, Option<f64>) {
    let start = anchor - Duration::days(days);
    let mut count = 0usize;
    let mut won = 0usize;
    for deal in deals {
        let Some(closed) = deal.closed_date else {
            continue;
        };
        if closed < start || closed > anchor {
            continue;
        }
        count += 1;
        if deal.is_won() {
            won += 1;
        }
    }
    let rate = (count > 0).then(|| won as f64 / count as f64);
    (count, rate)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MomentumReading {
    pub recent_deal_count: usize,
    pub baseline_deal_count: usize,
    pub win_rate_recent: Option<f64>,
    pub win_rate_baseline: Option<f64>,
    pub momentum_index: Option<f64>,
    pub status: MomentumStatus,
    pub warnings: Vec<Warning>,
}

/// Ratio of the recent-window win rate to the baseline-window win rate for one
/// rep's closed deals. Undefined, never zero or infinite, when either window is
/// too thin or the baseline rate is zero.
pub fn rep_momentum(deals: &[&Deal], anchor: NaiveDate, config: &EngineConfig) -> MomentumReading {
    let (recent_deal_count, win_rate_recent) =
        window_win_rate(deals, anchor, config.recent_window_days);
    let (baseline_deal_count, win_rate_baseline) =
        window_win_rate(deals, anchor, config.baseline_window_days);

    let mut warnings = Vec::new();
    let momentum_index = match (win_rate_recent, win_rate_baseline) {
        _ if baseline_deal_count < config.min_baseline_deals => {
            warnings.push(Warning::InsufficientData {
                observed: baseline_deal_count,
                required: config.min_baseline_deals,
            });
            None
        }
        _ if recent_deal_count < config.min_recent_deals => {
            warnings.push(Warning::InsufficientData {
                observed: recent_deal_count,
                required: config.min_recent_deals,
            });
            None
        }
        (Some(recent), Some(baseline)) if baseline > 0.0 => Some(recent / baseline),
        _ => {
            warnings.push(Warning::DegenerateInput {
                reason: "baseline win rate is zero".to_string(),
            });
            None
        }
    };

    let status = match momentum_index {
        None => MomentumStatus::Undefined,
        Some(value) if value > config.improving_threshold => MomentumStatus::Improving,
        Some(value) if value < config.decline_threshold => MomentumStatus::Declining,
        Some(_) => MomentumStatus::Stable,
    };
    debug!(?momentum_index, recent_deal_count, baseline_deal_count, "momentum computed");

    MomentumReading {
        recent_deal_count,
        baseline_deal_count,
        win_rate_recent,
        win_rate_baseline,
        momentum_index,
        status,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use crate::test_support::{closed_deal, day, push_rep};

    #[test]
    fn velocity_divides_amount_by_cycle_days() {
        let deal = closed_deal("d1", Outcome::Won, 100);
        assert_eq!(velocity_score(&deal), Some(Ok(500.0)));
    }

    #[test]
    fn non_positive_cycle_is_flagged_not_scored() {
        let mut deal = closed_deal("d1", Outcome::Won, 100);
        deal.created_date = day(100);
        assert_eq!(
            velocity_score(&deal),
            Some(Err(Warning::NonPositiveCycle { cycle_days: 0 }))
        );

        deal.created_date = day(105);
        let summary = summarize_velocity(&[deal, closed_deal("d2", Outcome::Won, 100)]);
        assert_eq!(summary.scored_deals, 1);
        assert_eq!(summary.flagged_deals.len(), 1);
        assert_eq!(summary.flagged_deals[0].deal_id, "d1");
        assert_eq!(summary.avg_won_velocity, Some(500.0));
    }

    #[test]
    fn open_deals_have_no_velocity() {
        let mut deal = closed_deal("d1", Outcome::Open, 100);
        deal.closed_date = None;
        assert_eq!(velocity_score(&deal), None);
    }

    #[test]
    fn snapshot_uses_latest_closed_deal() {
        let deals = vec![
            closed_deal("a", Outcome::Won, 10),
            closed_deal("b", Outcome::Lost, 40),
            closed_deal("c", Outcome::Won, 25),
        ];
        assert_eq!(snapshot_date(&deals), Some(day(40)));
        assert_eq!(snapshot_date(&[]), None);
    }

    #[test]
    fn segment_performance_is_ordered_by_value() {
        let mut deals = Vec::new();
        crate::test_support::push_region(&mut deals, "NA", 4, 3);
        crate::test_support::push_region(&mut deals, "EU", 2, 1);
        let segments = segment_performance(&deals, Factor::Region);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].value, "EU");
        assert_eq!(segments[0].win_rate, 0.5);
        // overall 4 of 6
        assert!((segments[0].vs_overall_pp - (0.5 - 4.0 / 6.0) * 100.0).abs() < 1e-9);
        assert_eq!(segments[1].value, "NA");
        assert_eq!(segments[1].won_count, 3);
        assert_eq!(segments[1].avg_won_velocity, Some(500.0));
    }

    #[test]
    fn momentum_compares_recent_to_baseline() {
        let mut deals = Vec::new();
        // 10 deals over the last 10 days, 6 deals 40-45 days before that.
        push_rep(&mut deals, "rep_1", 10, 200, &[0, 1, 2, 3, 4]);
        push_rep(&mut deals, "rep_x", 6, 160, &[0, 1, 2, 3, 4, 5]);
        let refs: Vec<&Deal> = deals.iter().collect();
        let reading = rep_momentum(&refs, day(200), &EngineConfig::default());

        assert_eq!(reading.recent_deal_count, 10);
        assert_eq!(reading.baseline_deal_count, 16);
        assert_eq!(reading.win_rate_recent, Some(0.5));
        let baseline = 11.0 / 16.0;
        assert_eq!(reading.win_rate_baseline, Some(baseline));
        let momentum = reading.momentum_index.unwrap();
        assert!((momentum - 0.5 / baseline).abs() < 1e-12);
        assert_eq!(reading.status, MomentumStatus::Declining);
    }

    #[test]
    fn momentum_is_undefined_for_zero_baseline() {
        let mut deals = Vec::new();
        push_rep(&mut deals, "rep_1", 10, 200, &[]);
        let refs: Vec<&Deal> = deals.iter().collect();
        let reading = rep_momentum(&refs, day(200), &EngineConfig::default());
        assert_eq!(reading.win_rate_baseline, Some(0.0));
        assert_eq!(reading.momentum_index, None);
        assert_eq!(reading.status, MomentumStatus::Undefined);
        assert!(matches!(reading.warnings[0], Warning::DegenerateInput { .. }));
    }

    #[test]
    fn momentum_is_undefined_without_baseline_deals() {
        let mut deals = Vec::new();
        push_rep(&mut deals, "rep_1", 10, 50, &[0, 1]);
        let refs: Vec<&Deal> = deals.iter().collect();
        let reading = rep_momentum(&refs, day(200), &EngineConfig::default());
        assert_eq!(reading.baseline_deal_count, 0);
        assert_eq!(reading.win_rate_baseline, None);
        assert_eq!(reading.momentum_index, None);
        assert_eq!(
            reading.warnings,
            vec![Warning::InsufficientData {
                observed: 0,
                required: 5
            }]
        );
    }
}
