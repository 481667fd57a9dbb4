use chrono::{Duration, NaiveDate};

use crate::models::{Deal, Outcome};

pub fn day(offset: i64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + Duration::days(offset)
}

pub fn closed_deal(id: &str, outcome: Outcome, closed_offset: i64) -> Deal {
    Deal {
        id: id.to_string(),
        created_date: day(closed_offset - 20),
        closed_date: Some(day(closed_offset)),
        outcome,
        amount: 10_000.0,
        region: "NA".to_string(),
        industry: "SaaS".to_string(),
        product_type: "Core".to_string(),
        lead_source: "Inbound".to_string(),
        stage_reached: "Proposal".to_string(),
        rep_id: "rep_1".to_string(),
    }
}

/// Appends `count` closed deals for one region, the first `wins` of them won.
pub fn push_region(deals: &mut Vec<Deal>, region: &str, count: usize, wins: usize) {
    for i in 0..count {
        let outcome = if i < wins { Outcome::Won } else { Outcome::Lost };
        let mut deal = closed_deal(&format!("{region}-{i}"), outcome, 100);
        deal.region = region.to_string();
        deals.push(deal);
    }
}

/// Appends `count` closed deals for one rep, spread one per day ending at
/// `last_offset`, with wins at the given indices.
pub fn push_rep(deals: &mut Vec<Deal>, rep: &str, count: usize, last_offset: i64, won: &[usize]) {
    for i in 0..count {
        let outcome = if won.contains(&i) { Outcome::Won } else { Outcome::Lost };
        let offset = last_offset - (count - 1 - i) as i64;
        let mut deal = closed_deal(&format!("{rep}-{i}"), outcome, offset);
        deal.rep_id = rep.to_string();
        deals.push(deal);
    }
}
