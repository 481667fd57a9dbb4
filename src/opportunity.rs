use std::cmp::Ordering;

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::metrics;
use crate::models::{
    Deal, EstimateKind, ExcludedSegment, Factor, Opportunity, Priority, SegmentStats,
    SignificanceResult, SkippedFactor, Warning,
};

/// Segments trailing the overall win rate by more than this many points are
/// high priority.
const HIGH_PRIORITY_GAP_PP: f64 = 10.0;

/// Higher win rate first; among equal rates the larger segment, then the
/// lexically smaller value.
fn best_first(a: &SegmentStats, b: &SegmentStats) -> Ordering {
    b.win_rate
        .total_cmp(&a.win_rate)
        .then_with(|| b.deal_count.cmp(&a.deal_count))
        .then_with(|| a.value.cmp(&b.value))
}

fn worst_first(a: &SegmentStats, b: &SegmentStats) -> Ordering {
    a.win_rate
        .total_cmp(&b.win_rate)
        .then_with(|| b.deal_count.cmp(&a.deal_count))
        .then_with(|| a.value.cmp(&b.value))
}

pub fn recommendation(factor: Factor, segment: &str) -> String {
    match factor {
        Factor::Region => format!(
            "Review the {segment} sales process: regional training, local competitive analysis or a shift of resources."
        ),
        Factor::Industry => format!(
            "Revisit the {segment} vertical strategy: industry-specific value propositions, case studies or specialist support."
        ),
        Factor::ProductType => format!(
            "Check {segment} pricing, positioning and competition, and consider product training for the team."
        ),
        Factor::LeadSource => format!(
            "Audit {segment} lead quality with marketing: tighter qualification criteria or a nurture program."
        ),
        Factor::StageReached => format!(
            "Find the objections that stall deals at {segment} and refresh enablement material for that stage."
        ),
        Factor::RepId => format!("Investigate the root cause of {segment} underperformance."),
    }
}

/// Picks the best and worst segments among those meeting the sample floor and
/// prices the gap. Segments below the floor never take part; they are returned
/// on the opportunity as excluded.
pub fn opportunity_for_segments(
    factor: Factor,
    significant: bool,
    segments: &[SegmentStats],
    min_segment_sample: usize,
) -> Result<Opportunity, Warning> {
    let (eligible, thin): (Vec<&SegmentStats>, Vec<&SegmentStats>) = segments
        .iter()
        .partition(|segment| segment.deal_count >= min_segment_sample);

    if eligible.len() < 2 {
        return Err(Warning::InsufficientData {
            observed: eligible.len(),
            required: 2,
        });
    }

    let best = eligible
        .iter()
        .copied()
        .min_by(|a, b| best_first(a, b))
        .ok_or(Warning::InsufficientData {
            observed: 0,
            required: 2,
        })?;
    let worst = eligible
        .iter()
        .copied()
        .filter(|segment| segment.value != best.value)
        .min_by(|a, b| worst_first(a, b))
        .ok_or(Warning::InsufficientData {
            observed: 1,
            required: 2,
        })?;

    let gap = best.win_rate - worst.win_rate;
    let estimated_revenue = gap * worst.avg_amount * worst.deal_count as f64;
    let priority = if worst.vs_overall_pp < -HIGH_PRIORITY_GAP_PP {
        Priority::High
    } else {
        Priority::Medium
    };

    let excluded_segments = thin
        .into_iter()
        .map(|segment| ExcludedSegment {
            value: segment.value.clone(),
            warning: Warning::InsufficientData {
                observed: segment.deal_count,
                required: min_segment_sample,
            },
        })
        .collect();

    Ok(Opportunity {
        factor,
        significant,
        best_segment: best.value.clone(),
        best_win_rate: best.win_rate,
        best_sample_size: best.deal_count,
        worst_segment: worst.value.clone(),
        worst_win_rate: worst.win_rate,
        worst_sample_size: worst.deal_count,
        worst_vs_overall_pp: worst.vs_overall_pp,
        win_rate_gap_pp: gap * 100.0,
        potential_additional_wins: (gap * worst.deal_count as f64).floor() as usize,
        estimated_revenue,
        estimate_kind: EstimateKind::FirstOrderEstimate,
        priority,
        recommendation: recommendation(factor, &worst.value),
        segments: segments.to_vec(),
        excluded_segments,
    })
}

/// One opportunity per confidently tested factor, ordered by estimated revenue.
/// Rep identity is left to the tier classifier.
pub fn generate_opportunities(
    deals: &[Deal],
    ranked: &[SignificanceResult],
    config: &EngineConfig,
) -> (Vec<Opportunity>, Vec<SkippedFactor>) {
    let mut opportunities = Vec::new();
    let mut skipped = Vec::new();

    for result in ranked
        .iter()
        .filter(|result| !result.low_confidence && result.factor != Factor::RepId)
    {
        let segments = metrics::segment_performance(deals, result.factor);
        match opportunity_for_segments(
            result.factor,
            result.significant,
            &segments,
            config.min_segment_sample,
        ) {
            Ok(opportunity) => {
                for excluded in &opportunity.excluded_segments {
                    warn!(
                        factor = %result.factor,
                        segment = %excluded.value,
                        warning = %excluded.warning,
                        "segment excluded from best/worst selection"
                    );
                }
                opportunities.push(opportunity);
            }
            Err(warning) => {
                warn!(factor = %result.factor, %warning, "no opportunity for factor");
                skipped.push(SkippedFactor {
                    factor: result.factor,
                    sample_size: result.sample_size,
                    warning,
                });
            }
        }
    }

    opportunities.sort_by(|a, b| {
        b.estimated_revenue
            .total_cmp(&a.estimated_revenue)
            .then_with(|| a.factor.cmp(&b.factor))
    });
    info!(
        opportunities = opportunities.len(),
        skipped = skipped.len(),
        "opportunity generation complete"
    );
    (opportunities, skipped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::significance::test_factors;
    use crate::test_support::push_region;

    fn segment(value: &str, count: usize, win_rate: f64, avg_amount: f64) -> SegmentStats {
        SegmentStats {
            value: value.to_string(),
            deal_count: count,
            won_count: (count as f64 * win_rate).round() as usize,
            win_rate,
            vs_overall_pp: 0.0,
            avg_amount,
            won_revenue: 0.0,
            avg_won_velocity: None,
        }
    }

    #[test]
    fn small_segments_are_never_best_or_worst() {
        let mut deals = Vec::new();
        push_region(&mut deals, "NA", 400, 180);
        push_region(&mut deals, "EU", 350, 140);
        push_region(&mut deals, "APAC", 20, 12);

        let segments = metrics::segment_performance(&deals, Factor::Region);
        let opportunity = opportunity_for_segments(Factor::Region, true, &segments, 50).unwrap();

        assert_eq!(opportunity.best_segment, "NA");
        assert_eq!(opportunity.worst_segment, "EU");
        assert!((opportunity.win_rate_gap_pp - 5.0).abs() < 1e-9);
        assert_eq!(opportunity.worst_sample_size, 350);
        // 0.05 * 10_000 * 350
        assert!((opportunity.estimated_revenue - 175_000.0).abs() < 1e-6);
        assert_eq!(opportunity.estimate_kind, EstimateKind::FirstOrderEstimate);
        assert_eq!(
            opportunity.excluded_segments,
            vec![ExcludedSegment {
                value: "APAC".to_string(),
                warning: Warning::InsufficientData {
                    observed: 20,
                    required: 50
                },
            }]
        );
        assert_eq!(opportunity.segments.len(), 3);
    }

    #[test]
    fn priority_and_recommendation_follow_the_worst_segment() {
        let mut deals = Vec::new();
        push_region(&mut deals, "NA", 100, 75);
        push_region(&mut deals, "EU", 100, 25);
        let segments = metrics::segment_performance(&deals, Factor::Region);
        let opportunity = opportunity_for_segments(Factor::Region, true, &segments, 50).unwrap();

        // overall 50%, EU 25%
        assert!((opportunity.worst_vs_overall_pp + 25.0).abs() < 1e-9);
        assert_eq!(opportunity.priority, Priority::High);
        assert_eq!(opportunity.potential_additional_wins, 50);
        assert!(opportunity.recommendation.contains("EU sales process"));
        assert!(opportunity.excluded_segments.is_empty());

        let mut close = Vec::new();
        push_region(&mut close, "NA", 100, 50);
        push_region(&mut close, "EU", 100, 44);
        let segments = metrics::segment_performance(&close, Factor::Region);
        let opportunity = opportunity_for_segments(Factor::Region, true, &segments, 50).unwrap();
        assert_eq!(opportunity.priority, Priority::Medium);
    }

    #[test]
    fn equal_win_rates_give_zero_gap() {
        let segments = vec![
            segment("A", 100, 0.4, 5_000.0),
            segment("B", 80, 0.4, 7_000.0),
        ];
        let opportunity = opportunity_for_segments(Factor::Industry, false, &segments, 50).unwrap();
        assert_eq!(opportunity.best_segment, "A");
        assert_eq!(opportunity.worst_segment, "B");
        assert_eq!(opportunity.win_rate_gap_pp, 0.0);
        assert_eq!(opportunity.estimated_revenue, 0.0);
        assert_eq!(opportunity.potential_additional_wins, 0);
    }

    #[test]
    fn needs_two_segments_over_the_floor() {
        let segments = vec![
            segment("A", 100, 0.4, 5_000.0),
            segment("B", 49, 0.9, 7_000.0),
        ];
        assert_eq!(
            opportunity_for_segments(Factor::Industry, true, &segments, 50),
            Err(Warning::InsufficientData {
                observed: 1,
                required: 2
            })
        );
    }

    #[test]
    fn estimates_are_non_negative() {
        let segments = vec![
            segment("A", 60, 0.7, 1_000.0),
            segment("B", 70, 0.2, 2_000.0),
            segment("C", 90, 0.5, 3_000.0),
        ];
        let opportunity = opportunity_for_segments(Factor::LeadSource, true, &segments, 50).unwrap();
        assert!(opportunity.estimated_revenue >= 0.0);
        assert!(opportunity.win_rate_gap_pp > 0.0);
        assert_eq!(opportunity.best_segment, "A");
        assert_eq!(opportunity.worst_segment, "B");
    }

    #[test]
    fn low_confidence_and_rep_factors_produce_no_opportunity() {
        let mut deals = Vec::new();
        push_region(&mut deals, "NA", 100, 70);
        push_region(&mut deals, "EU", 100, 30);
        for (i, deal) in deals.iter_mut().enumerate() {
            deal.rep_id = format!("rep_{}", i % 2);
        }
        let config = EngineConfig {
            factors: vec![Factor::Region, Factor::RepId],
            ..EngineConfig::default()
        };
        let (ranked, _) = test_factors(&deals, &config);
        assert_eq!(ranked.len(), 2);

        let (opportunities, skipped) = generate_opportunities(&deals, &ranked, &config);
        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].factor, Factor::Region);
        assert!(opportunities[0].significant);
        assert!(skipped.is_empty());

        let mut low = ranked.clone();
        for result in &mut low {
            result.low_confidence = true;
        }
        let (opportunities, _) = generate_opportunities(&deals, &low, &config);
        assert!(opportunities.is_empty());
    }
}
