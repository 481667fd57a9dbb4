use tracing::info;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::metrics;
use crate::models::{Deal, DriverReport};
use crate::opportunity;
use crate::report;
use crate::significance;
use crate::tiers;

/// Runs the full driver analysis over one snapshot of the deal table.
///
/// Configuration problems abort before any statistic is computed; data
/// problems in a single factor, segment or rep are recorded on that entry and
/// never stop the rest of the run.
pub fn analyze(deals: &[Deal], config: &EngineConfig) -> Result<DriverReport, EngineError> {
    config.validate()?;
    info!(deals = deals.len(), factors = config.factors.len(), "starting win rate driver analysis");

    let velocity = metrics::summarize_velocity(deals);
    let (factors, skipped_factors) = significance::test_factors(deals, config);
    let reps = tiers::classify_reps(deals, config);
    let (opportunities, skipped_opportunities) =
        opportunity::generate_opportunities(deals, &factors, config);

    Ok(report::assemble(
        deals,
        config,
        report::Sections {
            factors,
            skipped_factors,
            opportunities,
            skipped_opportunities,
            reps,
            velocity,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineArgs;
    use crate::models::{Factor, Outcome, RepTier, Warning};
    use crate::test_support::{push_region, push_rep};

    fn sample_deals() -> Vec<Deal> {
        let mut deals = Vec::new();
        push_region(&mut deals, "NA", 400, 180);
        push_region(&mut deals, "EU", 350, 140);
        push_region(&mut deals, "APAC", 20, 12);
        for (i, deal) in deals.iter_mut().enumerate() {
            deal.industry = ["SaaS", "Retail", "Health"][i % 3].to_string();
            deal.lead_source = if i % 5 == 0 { "Partner" } else { "Inbound" }.to_string();
            deal.rep_id = format!("rep_{}", i % 7);
            deal.closed_date = Some(crate::test_support::day(100 + (i % 90) as i64));
        }
        push_rep(&mut deals, "rookie", 10, 189, &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        deals[0].outcome = Outcome::Open;
        deals[0].closed_date = None;
        deals
    }

    #[test]
    fn empty_factor_list_aborts_the_run() {
        let config = EngineConfig {
            factors: Vec::new(),
            ..EngineConfig::default()
        };
        assert_eq!(analyze(&[], &config), Err(EngineError::EmptyFactorList));
    }

    #[test]
    fn unknown_factor_aborts_the_run() {
        let args = EngineArgs {
            factors: vec!["region".to_string(), "favourite_colour".to_string()],
            min_factor_sample: 30,
            min_segment_sample: 50,
            min_rep_deals: 20,
            alpha: 0.05,
            decline_threshold: 0.85,
            bottom_quantile: 0.25,
            top_quantile: 0.75,
        };
        assert_eq!(
            args.into_config(),
            Err(EngineError::UnknownFactor("favourite_colour".to_string()))
        );
    }

    #[test]
    fn report_is_byte_identical_across_runs() {
        let deals = sample_deals();
        let config = EngineConfig::default();
        let first = report::to_json(&analyze(&deals, &config).unwrap()).unwrap();
        let second = report::to_json(&analyze(&deals, &config).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn report_separates_confident_and_skipped_entries() {
        let deals = sample_deals();
        let report = analyze(&deals, &EngineConfig::default()).unwrap();

        assert_eq!(report.metadata.total_deals, deals.len());
        assert_eq!(report.metadata.open_deals, 1);
        assert_eq!(report.metadata.snapshot_date, Some(crate::test_support::day(189)));

        let tested: Vec<Factor> = report.factors.iter().map(|f| f.factor).collect();
        assert!(tested.contains(&Factor::Region));
        assert!(report
            .skipped_factors
            .iter()
            .any(|s| s.factor == Factor::ProductType));

        let region = report
            .opportunities
            .iter()
            .find(|o| o.factor == Factor::Region)
            .unwrap();
        assert_ne!(region.best_segment, "APAC");
        assert_ne!(region.worst_segment, "APAC");
        assert_eq!(region.excluded_segments.len(), 1);
        assert_eq!(region.excluded_segments[0].value, "APAC");
        assert_eq!(
            region.excluded_segments[0].warning,
            Warning::InsufficientData {
                observed: 20,
                required: 50
            }
        );
        let json = report::to_json(&report).unwrap();
        assert!(json.contains("\"excluded_segments\""));
        assert!(json.contains("\"value\": \"APAC\""));

        let rookie = report.reps.iter().find(|r| r.rep_id == "rookie").unwrap();
        assert_eq!(rookie.tier, RepTier::InsufficientData);
    }
}
