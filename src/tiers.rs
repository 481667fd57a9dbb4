use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::metrics::{self, MomentumReading};
use crate::models::{Deal, MomentumStatus, RepMetrics, RepTier, Warning};

/// Linear-interpolation quantile over ascending `sorted` values.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// A rep is ranked only with enough closed deals overall and enough inside the
/// baseline window to make the baseline rate meaningful.
fn is_rankable(rep: &RepMetrics, config: &EngineConfig) -> bool {
    rep.deal_count >= config.min_rep_deals
        && rep.baseline_deal_count >= config.min_baseline_deals
        && rep.win_rate_baseline.is_some()
}

/// Buckets reps by baseline win rate against quantile boundaries computed only
/// from rankable reps. Everyone else is `InsufficientData`.
pub fn assign_tiers(reps: Vec<RepMetrics>, config: &EngineConfig) -> Vec<RepMetrics> {
    let mut rates: Vec<f64> = reps
        .iter()
        .filter(|rep| is_rankable(rep, config))
        .filter_map(|rep| rep.win_rate_baseline)
        .collect();
    rates.sort_by(f64::total_cmp);

    let bounds = quantile(&rates, config.bottom_quantile)
        .zip(quantile(&rates, config.top_quantile));

    reps.into_iter()
        .map(|mut rep| {
            rep.tier = match (rep.win_rate_baseline, bounds) {
                (Some(rate), Some((lower, upper))) if is_rankable(&rep, config) => {
                    if lower >= upper {
                        RepTier::Middle
                    } else if rate <= lower {
                        RepTier::Bottom
                    } else if rate >= upper {
                        RepTier::Top
                    } else {
                        RepTier::Middle
                    }
                }
                _ => RepTier::InsufficientData,
            };
            rep
        })
        .collect()
}

fn rep_metrics(
    rep_id: &str,
    deals: &[&Deal],
    anchor: Option<NaiveDate>,
    config: &EngineConfig,
) -> RepMetrics {
    let closed: Vec<&Deal> = deals.iter().copied().filter(|deal| deal.is_closed()).collect();
    let deal_count = closed.len();
    let won: Vec<&&Deal> = closed.iter().filter(|deal| deal.is_won()).collect();
    let win_rate = (deal_count > 0).then(|| won.len() as f64 / deal_count as f64);
    let won_revenue: f64 = won.iter().map(|deal| deal.amount).sum();

    let reading = match anchor {
        Some(anchor) => metrics::rep_momentum(&closed, anchor, config),
        None => MomentumReading {
            recent_deal_count: 0,
            baseline_deal_count: 0,
            win_rate_recent: None,
            win_rate_baseline: None,
            momentum_index: None,
            status: MomentumStatus::Undefined,
            warnings: Vec::new(),
        },
    };

    let mut warnings = Vec::new();
    if deal_count < config.min_rep_deals {
        warnings.push(Warning::InsufficientData {
            observed: deal_count,
            required: config.min_rep_deals,
        });
    }
    warnings.extend(reading.warnings);

    RepMetrics {
        rep_id: rep_id.to_string(),
        deal_count,
        win_rate,
        recent_deal_count: reading.recent_deal_count,
        baseline_deal_count: reading.baseline_deal_count,
        win_rate_recent: reading.win_rate_recent,
        win_rate_baseline: reading.win_rate_baseline,
        momentum_index: reading.momentum_index,
        momentum_status: reading.status,
        declining: reading
            .momentum_index
            .is_some_and(|momentum| momentum < config.decline_threshold),
        tier: RepTier::InsufficientData,
        won_revenue,
        warnings,
    }
}

/// Per-rep metrics and tiers, ordered by rep id.
pub fn classify_reps(deals: &[Deal], config: &EngineConfig) -> Vec<RepMetrics> {
    let anchor = metrics::snapshot_date(deals);
    let mut by_rep: BTreeMap<&str, Vec<&Deal>> = BTreeMap::new();
    for deal in deals {
        by_rep.entry(deal.rep_id.as_str()).or_default().push(deal);
    }

    let grouped: Vec<(&str, Vec<&Deal>)> = by_rep.into_iter().collect();
    let reps: Vec<RepMetrics> = grouped
        .par_iter()
        .map(|(rep_id, rep_deals)| rep_metrics(rep_id, rep_deals, anchor, config))
        .collect();

    let reps = assign_tiers(reps, config);
    for rep in reps.iter().filter(|rep| rep.declining) {
        warn!(rep_id = %rep.rep_id, momentum = ?rep.momentum_index, tier = %rep.tier, "rep momentum declining");
    }
    info!(
        reps = reps.len(),
        ranked = reps.iter().filter(|rep| rep.tier != RepTier::InsufficientData).count(),
        declining = reps.iter().filter(|rep| rep.declining).count(),
        "rep tier classification complete"
    );
    reps
}
