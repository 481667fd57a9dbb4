use std::collections::BTreeSet;
use std::io::Read;

use anyhow::Context;
use chrono::NaiveDate;
use serde::Deserialize;
use tracing::{info, warn};

use crate::models::{Deal, Outcome};

#[derive(Debug, Deserialize)]
struct CsvRow {
    deal_id: String,
    created_date: NaiveDate,
    closed_date: Option<NaiveDate>,
    outcome: String,
    deal_amount: f64,
    region: String,
    industry: String,
    product_type: String,
    lead_source: String,
    deal_stage: String,
    sales_rep_id: String,
}

/// Valid deals plus the data-quality issues found while reading them.
#[derive(Debug, Clone, Default)]
pub struct IngestResult {
    pub deals: Vec<Deal>,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSummary {
    pub total_deals: usize,
    pub won: usize,
    pub lost: usize,
    pub open: usize,
    pub earliest_created: Option<NaiveDate>,
    pub latest_closed: Option<NaiveDate>,
    pub overall_win_rate: Option<f64>,
    pub avg_deal_amount: Option<f64>,
    pub avg_cycle_days: Option<f64>,
    pub unique_reps: usize,
    pub unique_regions: usize,
    pub unique_industries: usize,
}

fn into_deal(row: CsvRow) -> Result<Deal, String> {
    let outcome: Outcome = row.outcome.parse()?;
    if row.deal_amount < 0.0 || !row.deal_amount.is_finite() {
        return Err(format!("invalid amount {}", row.deal_amount));
    }
    if outcome.is_closed() && row.closed_date.is_none() {
        return Err(format!("{outcome} deal without closed_date"));
    }
    Ok(Deal {
        id: row.deal_id,
        created_date: row.created_date,
        closed_date: row.closed_date,
        outcome,
        amount: row.deal_amount,
        region: row.region,
        industry: row.industry,
        product_type: row.product_type,
        lead_source: row.lead_source,
        stage_reached: row.deal_stage,
        rep_id: row.sales_rep_id,
    })
}

/// Reads deals from CSV. Rows that cannot become a valid deal are dropped with
/// an issue; suspicious but usable rows are kept and reported.
pub fn read_deals<R: Read>(reader: R) -> anyhow::Result<IngestResult> {
    let mut reader = csv::Reader::from_reader(reader);
    let mut result = IngestResult::default();
    let mut seen = BTreeSet::new();

    for (index, row) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 2;
        let row = row.with_context(|| format!("malformed CSV row at line {line}"))?;
        let deal_id = row.deal_id.clone();

        if !seen.insert(deal_id.clone()) {
            result.issues.push(format!("line {line}: duplicate deal id {deal_id}, skipped"));
            continue;
        }

        match into_deal(row) {
            Ok(deal) => {
                if deal.cycle_days().is_some_and(|days| days < 0) {
                    result.issues.push(format!(
                        "line {line}: deal {deal_id} closed before it was created"
                    ));
                }
                result.deals.push(deal);
            }
            Err(reason) => {
                result
                    .issues
                    .push(format!("line {line}: deal {deal_id} rejected: {reason}"));
            }
        }
    }

    for issue in &result.issues {
        warn!(%issue, "data quality issue");
    }
    info!(
        deals = result.deals.len(),
        issues = result.issues.len(),
        "deal table loaded"
    );
    Ok(result)
}

pub fn load_csv(path: &std::path::Path) -> anyhow::Result<IngestResult> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    read_deals(file)
}

pub fn summarize(deals: &[Deal]) -> DataSummary {
    let count = |outcome: Outcome| deals.iter().filter(|deal| deal.outcome == outcome).count();
    let won = count(Outcome::Won);
    let lost = count(Outcome::Lost);
    let cycles: Vec<i64> = deals.iter().filter_map(Deal::cycle_days).collect();
    let mean = |total: f64, n: usize| (n > 0).then(|| total / n as f64);

    DataSummary {
        total_deals: deals.len(),
        won,
        lost,
        open: count(Outcome::Open),
        earliest_created: deals.iter().map(|deal| deal.created_date).min(),
        latest_closed: deals.iter().filter_map(|deal| deal.closed_date).max(),
        overall_win_rate: mean(won as f64, won + lost),
        avg_deal_amount: mean(deals.iter().map(|deal| deal.amount).sum(), deals.len()),
        avg_cycle_days: mean(cycles.iter().sum::<i64>() as f64, cycles.len()),
        unique_reps: deals.iter().map(|deal| &deal.rep_id).collect::<BTreeSet<_>>().len(),
        unique_regions: deals.iter().map(|deal| &deal.region).collect::<BTreeSet<_>>().len(),
        unique_industries: deals
            .iter()
            .map(|deal| &deal.industry)
            .collect::<BTreeSet<_>>()
            .len(),
    }
}
