use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Open,
    Won,
    Lost,
}

impl Outcome {
    pub fn is_closed(self) -> bool {
        matches!(self, Outcome::Won | Outcome::Lost)
    }
}

impl FromStr for Outcome {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Outcome::Open),
            "won" => Ok(Outcome::Won),
            "lost" => Ok(Outcome::Lost),
            other => Err(format!("unknown outcome '{other}'")),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Outcome::Open => "Open",
            Outcome::Won => "Won",
            Outcome::Lost => "Lost",
        };
        f.write_str(label)
    }
}

/// A categorical deal attribute that can be tested against outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Region,
    Industry,
    ProductType,
    LeadSource,
    StageReached,
    RepId,
}

impl Factor {
    pub const ALL: [Factor; 6] = [
        Factor::Region,
        Factor::Industry,
        Factor::ProductType,
        Factor::LeadSource,
        Factor::StageReached,
        Factor::RepId,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Factor::Region => "region",
            Factor::Industry => "industry",
            Factor::ProductType => "product_type",
            Factor::LeadSource => "lead_source",
            Factor::StageReached => "stage_reached",
            Factor::RepId => "rep_id",
        }
    }

    /// Parses a list of factor names, failing on the first name that is not
    /// a column of the deal table.
    pub fn parse_list<S: AsRef<str>>(names: &[S]) -> Result<Vec<Factor>, EngineError> {
        if names.is_empty() {
            return Err(EngineError::EmptyFactorList);
        }
        let mut factors = Vec::with_capacity(names.len());
        for name in names {
            let factor: Factor = name.as_ref().parse()?;
            if !factors.contains(&factor) {
                factors.push(factor);
            }
        }
        Ok(factors)
    }
}

impl FromStr for Factor {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "region" => Ok(Factor::Region),
            "industry" => Ok(Factor::Industry),
            "product_type" => Ok(Factor::ProductType),
            "lead_source" => Ok(Factor::LeadSource),
            "stage_reached" | "deal_stage" => Ok(Factor::StageReached),
            "rep_id" | "sales_rep_id" => Ok(Factor::RepId),
            _ => Err(EngineError::UnknownFactor(value.to_string())),
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deal {
    pub id: String,
    pub created_date: NaiveDate,
    pub closed_date: Option<NaiveDate>,
    pub outcome: Outcome,
    pub amount: f64,
    pub region: String,
    pub industry: String,
    pub product_type: String,
    pub lead_source: String,
    pub stage_reached: String,
    pub rep_id: String,
}

impl Deal {
    pub fn factor_value(&self, factor: Factor) -> &str {
        match factor {
            Factor::Region => &self.region,
            Factor::Industry => &self.industry,
            Factor::ProductType => &self.product_type,
            Factor::LeadSource => &self.lead_source,
            Factor::StageReached => &self.stage_reached,
            Factor::RepId => &self.rep_id,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.outcome.is_closed() && self.closed_date.is_some()
    }

    pub fn is_won(&self) -> bool {
        self.outcome == Outcome::Won
    }

    pub fn cycle_days(&self) -> Option<i64> {
        self.closed_date
            .map(|closed| (closed - self.created_date).num_days())
    }
}

/// Per-entity conditions that are recorded instead of aborting the run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    InsufficientData { observed: usize, required: usize },
    DegenerateInput { reason: String },
    NonPositiveCycle { cycle_days: i64 },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::InsufficientData { observed, required } => {
                write!(f, "insufficient data ({observed} < {required})")
            }
            Warning::DegenerateInput { reason } => write!(f, "degenerate input: {reason}"),
            Warning::NonPositiveCycle { cycle_days } => {
                write!(f, "non-positive sales cycle ({cycle_days} days)")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectSize {
    Small,
    Medium,
    Large,
}

impl EffectSize {
    pub fn from_cramers_v(value: f64) -> Self {
        if value > 0.25 {
            EffectSize::Large
        } else if value > 0.15 {
            EffectSize::Medium
        } else {
            EffectSize::Small
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificanceResult {
    pub factor: Factor,
    pub chi_square: f64,
    pub degrees_of_freedom: usize,
    pub p_value: f64,
    pub cramers_v: f64,
    pub effect_size: EffectSize,
    pub significant: bool,
    pub sample_size: usize,
    pub levels: usize,
    pub min_expected_count: f64,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedFactor {
    pub factor: Factor,
    pub sample_size: usize,
    pub warning: Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentStats {
    pub value: String,
    pub deal_count: usize,
    pub won_count: usize,
    pub win_rate: f64,
    pub vs_overall_pp: f64,
    pub avg_amount: f64,
    pub won_revenue: f64,
    pub avg_won_velocity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedSegment {
    pub value: String,
    pub warning: Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Priority::High => "High",
            Priority::Medium => "Medium",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateKind {
    FirstOrderEstimate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Opportunity {
    pub factor: Factor,
    pub significant: bool,
    pub best_segment: String,
    pub best_win_rate: f64,
    pub best_sample_size: usize,
    pub worst_segment: String,
    pub worst_win_rate: f64,
    pub worst_sample_size: usize,
    pub worst_vs_overall_pp: f64,
    pub win_rate_gap_pp: f64,
    pub potential_additional_wins: usize,
    pub estimated_revenue: f64,
    pub estimate_kind: EstimateKind,
    pub priority: Priority,
    pub recommendation: String,
    pub segments: Vec<SegmentStats>,
    pub excluded_segments: Vec<ExcludedSegment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepTier {
    Top,
    Middle,
    Bottom,
    InsufficientData,
}

impl fmt::Display for RepTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RepTier::Top => "Top",
            RepTier::Middle => "Middle",
            RepTier::Bottom => "Bottom",
            RepTier::InsufficientData => "InsufficientData",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumStatus {
    Improving,
    Stable,
    Declining,
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepMetrics {
    pub rep_id: String,
    pub deal_count: usize,
    pub win_rate: Option<f64>,
    pub recent_deal_count: usize,
    pub baseline_deal_count: usize,
    pub win_rate_recent: Option<f64>,
    pub win_rate_baseline: Option<f64>,
    pub momentum_index: Option<f64>,
    pub momentum_status: MomentumStatus,
    pub declining: bool,
    pub tier: RepTier,
    pub won_revenue: f64,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlaggedDeal {
    pub deal_id: String,
    pub warning: Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VelocitySummary {
    pub scored_deals: usize,
    pub flagged_deals: Vec<FlaggedDeal>,
    pub avg_won_velocity: Option<f64>,
    pub top_industry: Option<(String, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportMetadata {
    pub snapshot_date: Option<NaiveDate>,
    pub total_deals: usize,
    pub closed_deals: usize,
    pub open_deals: usize,
    pub overall_win_rate: Option<f64>,
    pub config: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriverReport {
    pub metadata: ReportMetadata,
    pub factors: Vec<SignificanceResult>,
    pub skipped_factors: Vec<SkippedFactor>,
    pub opportunities: Vec<Opportunity>,
    pub skipped_opportunities: Vec<SkippedFactor>,
    pub reps: Vec<RepMetrics>,
    pub velocity: VelocitySummary,
}
