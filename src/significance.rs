use std::cmp::Ordering;
use std::collections::BTreeMap;

use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::models::{
    Deal, EffectSize, Factor, Outcome, SignificanceResult, SkippedFactor, Warning,
};

/// Factor value x outcome counts over closed deals. Rows are factor values in
/// lexical order, columns are the outcomes actually observed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContingencyTable {
    pub factor: Factor,
    pub levels: Vec<String>,
    pub outcomes: Vec<Outcome>,
    pub counts: Vec<Vec<usize>>,
}

impl ContingencyTable {
    pub fn build(deals: &[Deal], factor: Factor) -> Self {
        let mut cells: BTreeMap<&str, BTreeMap<Outcome, usize>> = BTreeMap::new();
        let mut observed = [false; 2];
        for deal in deals.iter().filter(|deal| deal.is_closed()) {
            *cells
                .entry(deal.factor_value(factor))
                .or_default()
                .entry(deal.outcome)
                .or_default() += 1;
            observed[usize::from(!deal.is_won())] = true;
        }

        let outcomes: Vec<Outcome> = [Outcome::Won, Outcome::Lost]
            .into_iter()
            .zip(observed)
            .filter_map(|(outcome, seen)| seen.then_some(outcome))
            .collect();

        let mut levels = Vec::with_capacity(cells.len());
        let mut counts = Vec::with_capacity(cells.len());
        for (level, row) in cells {
            levels.push(level.to_string());
            counts.push(
                outcomes
                    .iter()
                    .map(|outcome| row.get(outcome).copied().unwrap_or(0))
                    .collect(),
            );
        }

        Self {
            factor,
            levels,
            outcomes,
            counts,
        }
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn row_totals(&self) -> Vec<usize> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    pub fn column_totals(&self) -> Vec<usize> {
        (0..self.outcomes.len())
            .map(|col| self.counts.iter().map(|row| row[col]).sum())
            .collect()
    }

    /// True when either dimension has a single level, leaving nothing to test.
    pub fn is_degenerate(&self) -> bool {
        self.levels.len() < 2 || self.outcomes.len() < 2
    }
}

/// Upper-tail probability of the chi-square distribution. Kept behind a trait
/// so the statistics backend can change without touching the engine.
pub trait ChiSquareTail {
    fn upper_tail(&self, statistic: f64, degrees_of_freedom: usize) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StatrsTail;

impl ChiSquareTail for StatrsTail {
    fn upper_tail(&self, statistic: f64, degrees_of_freedom: usize) -> f64 {
        match ChiSquared::new(degrees_of_freedom as f64) {
            Ok(dist) => dist.sf(statistic).clamp(0.0, 1.0),
            Err(_) => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    pub cramers_v: f64,
    pub min_expected: f64,
}

/// Pearson chi-square test of independence plus Cramér's V. Returns `None` for a
/// degenerate table.
pub fn chi_square_test<T: ChiSquareTail>(table: &ContingencyTable, tail: &T) -> Option<ChiSquareTest> {
    if table.is_degenerate() {
        return None;
    }
    let n = table.total() as f64;
    let rows = table.row_totals();
    let cols = table.column_totals();

    let mut statistic = 0.0;
    let mut min_expected = f64::INFINITY;
    for (r, row) in table.counts.iter().enumerate() {
        for (c, &observed) in row.iter().enumerate() {
            let expected = rows[r] as f64 * cols[c] as f64 / n;
            min_expected = min_expected.min(expected);
            let diff = observed as f64 - expected;
            statistic += diff * diff / expected;
        }
    }

    let r = table.levels.len();
    let c = table.outcomes.len();
    let degrees_of_freedom = (r - 1) * (c - 1);
    let min_dim = (r - 1).min(c - 1) as f64;
    let cramers_v = (statistic / (n * min_dim)).sqrt().clamp(0.0, 1.0);

    Some(ChiSquareTest {
        statistic,
        degrees_of_freedom,
        p_value: tail.upper_tail(statistic, degrees_of_freedom),
        cramers_v,
        min_expected,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum FactorTest {
    Tested(SignificanceResult),
    Skipped(SkippedFactor),
}

pub fn test_factor<T: ChiSquareTail>(
    deals: &[Deal],
    factor: Factor,
    config: &EngineConfig,
    tail: &T,
) -> FactorTest {
    let table = ContingencyTable::build(deals, factor);
    let sample_size = table.total();

    let skip = |warning: Warning| {
        warn!(%factor, sample_size, %warning, "skipping factor");
        FactorTest::Skipped(SkippedFactor {
            factor,
            sample_size,
            warning,
        })
    };

    if table.is_degenerate() {
        let reason = if table.levels.len() < 2 {
            format!("{} observed value(s) of {factor}", table.levels.len())
        } else {
            "outcome has a single observed value".to_string()
        };
        return skip(Warning::DegenerateInput { reason });
    }
    if sample_size < config.min_factor_sample {
        return skip(Warning::InsufficientData {
            observed: sample_size,
            required: config.min_factor_sample,
        });
    }
    let Some(test) = chi_square_test(&table, tail) else {
        return skip(Warning::DegenerateInput {
            reason: "contingency table could not be tested".to_string(),
        });
    };

    debug!(
        %factor,
        chi_square = test.statistic,
        p_value = test.p_value,
        cramers_v = test.cramers_v,
        "factor tested"
    );

    FactorTest::Tested(SignificanceResult {
        factor,
        chi_square: test.statistic,
        degrees_of_freedom: test.degrees_of_freedom,
        p_value: test.p_value,
        cramers_v: test.cramers_v,
        effect_size: EffectSize::from_cramers_v(test.cramers_v),
        significant: test.p_value < config.alpha,
        sample_size,
        levels: table.levels.len(),
        min_expected_count: test.min_expected,
        low_confidence: test.min_expected < 5.0,
    })
}

/// Cramér's V descending, then p-value ascending, then sample size descending.
pub fn compare_results(a: &SignificanceResult, b: &SignificanceResult) -> Ordering {
    b.cramers_v
        .total_cmp(&a.cramers_v)
        .then_with(|| a.p_value.total_cmp(&b.p_value))
        .then_with(|| b.sample_size.cmp(&a.sample_size))
        .then_with(|| a.factor.cmp(&b.factor))
}

pub fn rank_factors(mut results: Vec<SignificanceResult>) -> Vec<SignificanceResult> {
    results.sort_by(compare_results);
    results
}

/// Tests every configured factor in parallel and returns the ranked results
/// alongside the factors that were skipped, in configuration order.
pub fn test_factors(
    deals: &[Deal],
    config: &EngineConfig,
) -> (Vec<SignificanceResult>, Vec<SkippedFactor>) {
    let tail = StatrsTail;
    let outcomes: Vec<FactorTest> = config
        .factors
        .par_iter()
        .map(|&factor| test_factor(deals, factor, config, &tail))
        .collect();

    let mut tested = Vec::new();
    let mut skipped = Vec::new();
    for outcome in outcomes {
        match outcome {
            FactorTest::Tested(result) => tested.push(result),
            FactorTest::Skipped(entry) => skipped.push(entry),
        }
    }

    let ranked = rank_factors(tested);
    info!(
        tested = ranked.len(),
        skipped = skipped.len(),
        low_confidence = ranked.iter().filter(|r| r.low_confidence).count(),
        "factor significance testing complete"
    );
    (ranked, skipped)
}
