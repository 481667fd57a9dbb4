use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::ingest;
use crate::models::{Deal, DriverReport, Outcome};
use crate::report;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Inserts a deal unless its id already exists. Returns true when a row was written.
async fn insert_deal(pool: &PgPool, deal: &Deal) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO win_rate_drivers.deals
        (deal_id, created_date, closed_date, outcome, amount, region, industry,
         product_type, lead_source, stage_reached, rep_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (deal_id) DO NOTHING
        "#,
    )
    .bind(&deal.id)
    .bind(deal.created_date)
    .bind(deal.closed_date)
    .bind(deal.outcome.to_string())
    .bind(deal.amount)
    .bind(&deal.region)
    .bind(&deal.industry)
    .bind(&deal.product_type)
    .bind(&deal.lead_source)
    .bind(&deal.stage_reached)
    .bind(&deal.rep_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<usize> {
    let date = |y: i32, m: u32, d: u32| NaiveDate::from_ymd_opt(y, m, d).context("invalid date");

    let rows = vec![
        ("seed-001", date(2025, 9, 2)?, Some(date(2025, 10, 14)?), Outcome::Won, 48_000.0, "North America", "SaaS", "Core", "Inbound", "Negotiation", "rep_avery"),
        ("seed-002", date(2025, 9, 10)?, Some(date(2025, 11, 3)?), Outcome::Lost, 22_500.0, "EMEA", "FinTech", "Pro", "Outbound", "Proposal", "rep_jules"),
        ("seed-003", date(2025, 10, 1)?, Some(date(2025, 11, 20)?), Outcome::Won, 91_000.0, "North America", "HealthTech", "Enterprise", "Partner", "Negotiation", "rep_kiara"),
        ("seed-004", date(2025, 10, 6)?, Some(date(2025, 12, 1)?), Outcome::Lost, 15_000.0, "APAC", "EdTech", "Core", "Referral", "Demo", "rep_avery"),
        ("seed-005", date(2025, 11, 12)?, None, Outcome::Open, 37_250.0, "EMEA", "SaaS", "Pro", "Inbound", "Qualified", "rep_jules"),
        ("seed-006", date(2025, 11, 18)?, Some(date(2025, 12, 19)?), Outcome::Won, 64_400.0, "LATAM", "Ecommerce", "Enterprise", "Outbound", "Negotiation", "rep_kiara"),
    ];

    let mut inserted = 0usize;
    for (id, created, closed, outcome, amount, region, industry, product, source, stage, rep) in rows {
        let deal = Deal {
            id: id.to_string(),
            created_date: created,
            closed_date: closed,
            outcome,
            amount,
            region: region.to_string(),
            industry: industry.to_string(),
            product_type: product.to_string(),
            lead_source: source.to_string(),
            stage_reached: stage.to_string(),
            rep_id: rep.to_string(),
        };
        if insert_deal(pool, &deal).await? {
            inserted += 1;
        }
    }

    Ok(inserted)
}

pub async fn fetch_deals(pool: &PgPool, since: Option<NaiveDate>) -> anyhow::Result<Vec<Deal>> {
    let mut query = String::from(
        "SELECT deal_id, created_date, closed_date, outcome, amount, region, industry, \
         product_type, lead_source, stage_reached, rep_id \
         FROM win_rate_drivers.deals",
    );
    if since.is_some() {
        query.push_str(" WHERE closed_date IS NULL OR closed_date >= $1");
    }
    query.push_str(" ORDER BY deal_id");

    let mut rows = sqlx::query(&query);
    if let Some(value) = since {
        rows = rows.bind(value);
    }

    let records = rows.fetch_all(pool).await?;
    let mut deals = Vec::with_capacity(records.len());

    for row in records {
        let outcome: String = row.get("outcome");
        let deal_id: String = row.get("deal_id");
        let outcome: Outcome = outcome
            .parse::<Outcome>()
            .map_err(|err: String| anyhow::anyhow!(err))
            .with_context(|| format!("deal {deal_id} has an invalid outcome"))?;
        deals.push(Deal {
            id: deal_id,
            created_date: row.get("created_date"),
            closed_date: row.get("closed_date"),
            outcome,
            amount: row.get("amount"),
            region: row.get("region"),
            industry: row.get("industry"),
            product_type: row.get("product_type"),
            lead_source: row.get("lead_source"),
            stage_reached: row.get("stage_reached"),
            rep_id: row.get("rep_id"),
        });
    }

    Ok(deals)
}

/// Returns (inserted, issues) for a CSV import.
pub async fn import_csv(
    pool: &PgPool,
    csv_path: &std::path::Path,
) -> anyhow::Result<(usize, Vec<String>)> {
    let loaded = ingest::load_csv(csv_path)?;
    let mut inserted = 0usize;

    for deal in &loaded.deals {
        if insert_deal(pool, deal).await? {
            inserted += 1;
        }
    }

    Ok((inserted, loaded.issues))
}

/// Persists a report under a fresh run id. The id is storage metadata only.
pub async fn save_report(pool: &PgPool, driver_report: &DriverReport) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    let payload = report::to_json(driver_report)?;
    let total_deals = i32::try_from(driver_report.metadata.total_deals)
        .context("deal count does not fit the report_runs table")?;

    sqlx::query(
        r#"
        INSERT INTO win_rate_drivers.report_runs (id, snapshot_date, total_deals, report)
        VALUES ($1, $2, $3, $4::jsonb)
        "#,
    )
    .bind(id)
    .bind(driver_report.metadata.snapshot_date)
    .bind(total_deals)
    .bind(payload)
    .execute(pool)
    .await?;

    Ok(id)
}
