use std::fmt::Write;

use crate::config::EngineConfig;
use crate::metrics;
use crate::models::{
    Deal, DriverReport, MomentumStatus, Opportunity, RepMetrics, RepTier, ReportMetadata,
    SignificanceResult, SkippedFactor, VelocitySummary,
};

/// Stage outputs merged into a [`DriverReport`].
pub struct Sections {
    pub factors: Vec<SignificanceResult>,
    pub skipped_factors: Vec<SkippedFactor>,
    pub opportunities: Vec<Opportunity>,
    pub skipped_opportunities: Vec<SkippedFactor>,
    pub reps: Vec<RepMetrics>,
    pub velocity: VelocitySummary,
}

/// Stamps metadata derived from the deal table itself, never the wall clock,
/// so identical input always yields identical output.
pub fn assemble(deals: &[Deal], config: &EngineConfig, sections: Sections) -> DriverReport {
    let closed: Vec<&Deal> = deals.iter().filter(|deal| deal.is_closed()).collect();
    let won = closed.iter().filter(|deal| deal.is_won()).count();

    DriverReport {
        metadata: ReportMetadata {
            snapshot_date: metrics::snapshot_date(deals),
            total_deals: deals.len(),
            closed_deals: closed.len(),
            open_deals: deals.len() - closed.len(),
            overall_win_rate: (!closed.is_empty()).then(|| won as f64 / closed.len() as f64),
            config: config.clone(),
        },
        factors: sections.factors,
        skipped_factors: sections.skipped_factors,
        opportunities: sections.opportunities,
        skipped_opportunities: sections.skipped_opportunities,
        reps: sections.reps,
        velocity: sections.velocity,
    }
}

pub fn to_json(report: &DriverReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(report)
}

fn pct(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |value| format!("{:.1}%", value * 100.0))
}

pub fn render_markdown(report: &DriverReport) -> String {
    let mut output = String::new();
    let meta = &report.metadata;
    let snapshot = meta
        .snapshot_date
        .map_or_else(|| "no closed deals".to_string(), |date| date.to_string());

    let _ = writeln!(output, "# Win Rate Driver Analysis");
    let _ = writeln!(
        output,
        "Snapshot {} | {} deals ({} closed, {} open) | overall win rate {}",
        snapshot,
        meta.total_deals,
        meta.closed_deals,
        meta.open_deals,
        pct(meta.overall_win_rate)
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Factors Ranked by Effect Size");

    if report.factors.is_empty() {
        let _ = writeln!(output, "No factor had enough data to test.");
    } else {
        for (rank, factor) in report.factors.iter().enumerate() {
            let mut flags = Vec::new();
            if factor.significant {
                flags.push("significant");
            }
            if factor.low_confidence {
                flags.push("LOW CONFIDENCE");
            }
            let _ = writeln!(
                output,
                "{}. {}: Cramér's V {:.3} ({:?}), chi-square {:.2}, df {}, p {:.4}, n {}{}",
                rank + 1,
                factor.factor,
                factor.cramers_v,
                factor.effect_size,
                factor.chi_square,
                factor.degrees_of_freedom,
                factor.p_value,
                factor.sample_size,
                if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                }
            );
        }
    }

    if !report.skipped_factors.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Not Tested");
        for skipped in &report.skipped_factors {
            let _ = writeln!(output, "- {} (n {}): {}", skipped.factor, skipped.sample_size, skipped.warning);
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Opportunities");
    let _ = writeln!(
        output,
        "Revenue figures are first-order estimates, not forecasts."
    );

    if report.opportunities.is_empty() {
        let _ = writeln!(output, "No factor had two segments large enough to compare.");
    } else {
        for opportunity in &report.opportunities {
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "### {} [{} priority]{}",
                opportunity.factor,
                opportunity.priority,
                if opportunity.significant { "" } else { " (not significant)" }
            );
            let _ = writeln!(
                output,
                "Best {} ({} over {} deals) vs worst {} ({} over {} deals, {:+.1}pp vs overall), gap {:.1}pp",
                opportunity.best_segment,
                pct(Some(opportunity.best_win_rate)),
                opportunity.best_sample_size,
                opportunity.worst_segment,
                pct(Some(opportunity.worst_win_rate)),
                opportunity.worst_sample_size,
                opportunity.worst_vs_overall_pp,
                opportunity.win_rate_gap_pp
            );
            let _ = writeln!(
                output,
                "Closing the gap: ~{} more wins, est. ${:.0}",
                opportunity.potential_additional_wins, opportunity.estimated_revenue
            );
            let _ = writeln!(output, "Recommendation: {}", opportunity.recommendation);
            let _ = writeln!(output);
            let _ = writeln!(
                output,
                "| Segment | Deals | Win rate | vs overall | Won revenue | Avg won velocity |"
            );
            let _ = writeln!(output, "|---|---|---|---|---|---|");
            for segment in &opportunity.segments {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} | {:+.1}pp | ${:.0} | {} |",
                    segment.value,
                    segment.deal_count,
                    pct(Some(segment.win_rate)),
                    segment.vs_overall_pp,
                    segment.won_revenue,
                    segment
                        .avg_won_velocity
                        .map_or_else(|| "n/a".to_string(), |avg| format!("${avg:.0}/day"))
                );
            }
            for excluded in &opportunity.excluded_segments {
                let _ = writeln!(
                    output,
                    "Excluded from comparison: {} ({})",
                    excluded.value, excluded.warning
                );
            }
        }
    }
    if !report.skipped_opportunities.is_empty() {
        let _ = writeln!(output);
    }
    for skipped in &report.skipped_opportunities {
        let _ = writeln!(output, "- {}: no opportunity, {}", skipped.factor, skipped.warning);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Rep Tiers");
    for tier in [RepTier::Top, RepTier::Middle, RepTier::Bottom, RepTier::InsufficientData] {
        let count = report.reps.iter().filter(|rep| rep.tier == tier).count();
        let _ = writeln!(output, "- {tier}: {count} reps");
    }

    let mut declining: Vec<&RepMetrics> = report.reps.iter().filter(|rep| rep.declining).collect();
    declining.sort_by(|a, b| {
        a.momentum_index
            .unwrap_or(f64::INFINITY)
            .total_cmp(&b.momentum_index.unwrap_or(f64::INFINITY))
            .then_with(|| a.rep_id.cmp(&b.rep_id))
    });
    if !declining.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "### Declining Momentum");
        for rep in declining {
            let _ = writeln!(
                output,
                "- {} ({}): momentum {:.2}, recent {} vs baseline {}",
                rep.rep_id,
                rep.tier,
                rep.momentum_index.unwrap_or_default(),
                pct(rep.win_rate_recent),
                pct(rep.win_rate_baseline)
            );
        }
    }
    let improving = report
        .reps
        .iter()
        .filter(|rep| rep.momentum_status == MomentumStatus::Improving)
        .count();
    let _ = writeln!(output, "Improving reps: {improving}");

    let _ = writeln!(output);
    let _ = writeln!(output, "## Deal Velocity");
    let velocity = &report.velocity;
    match velocity.avg_won_velocity {
        Some(avg) => {
            let _ = writeln!(output, "Average won-deal velocity: ${avg:.0}/day");
        }
        None => {
            let _ = writeln!(output, "No won deals with a positive sales cycle.");
        }
    }
    if let Some((industry, avg)) = &velocity.top_industry {
        let _ = writeln!(output, "Highest velocity industry: {industry} (${avg:.0}/day)");
    }
    if !velocity.flagged_deals.is_empty() {
        let _ = writeln!(
            output,
            "{} deals excluded for non-positive sales cycles.",
            velocity.flagged_deals.len()
        );
    }

    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Drivers indicate correlation, not causation. Use them to guide investigation."
    );

    output
}
