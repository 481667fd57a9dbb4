use clap::Args;
use serde::Serialize;

use crate::error::EngineError;
use crate::models::Factor;

/// Thresholds and windows used by every stage of the analysis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineConfig {
    pub factors: Vec<Factor>,
    pub min_factor_sample: usize,
    pub min_segment_sample: usize,
    pub min_rep_deals: usize,
    pub alpha: f64,
    pub decline_threshold: f64,
    pub improving_threshold: f64,
    pub bottom_quantile: f64,
    pub top_quantile: f64,
    pub recent_window_days: i64,
    pub baseline_window_days: i64,
    pub min_recent_deals: usize,
    pub min_baseline_deals: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            factors: Factor::ALL.to_vec(),
            min_factor_sample: 30,
            min_segment_sample: 50,
            min_rep_deals: 20,
            alpha: 0.05,
            decline_threshold: 0.85,
            improving_threshold: 1.1,
            bottom_quantile: 0.25,
            top_quantile: 0.75,
            recent_window_days: 30,
            baseline_window_days: 90,
            min_recent_deals: 3,
            min_baseline_deals: 5,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.factors.is_empty() {
            return Err(EngineError::EmptyFactorList);
        }
        if !(0.0..=1.0).contains(&self.bottom_quantile)
            || !(0.0..=1.0).contains(&self.top_quantile)
            || self.bottom_quantile >= self.top_quantile
        {
            return Err(EngineError::InvalidConfig(format!(
                "tier quantiles must satisfy 0 <= bottom < top <= 1 (got {} / {})",
                self.bottom_quantile, self.top_quantile
            )));
        }
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "alpha must be in (0, 1) (got {})",
                self.alpha
            )));
        }
        if self.decline_threshold <= 0.0 || self.improving_threshold <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "momentum thresholds must be positive".to_string(),
            ));
        }
        if self.min_factor_sample == 0 || self.min_segment_sample == 0 || self.min_rep_deals == 0 {
            return Err(EngineError::InvalidConfig(
                "minimum sample sizes must be at least 1".to_string(),
            ));
        }
        if self.recent_window_days <= 0 || self.baseline_window_days < self.recent_window_days {
            return Err(EngineError::InvalidConfig(format!(
                "windows must satisfy 0 < recent <= baseline (got {} / {})",
                self.recent_window_days, self.baseline_window_days
            )));
        }
        Ok(())
    }
}

/// Command line view of [`EngineConfig`].
#[derive(Debug, Clone, Args)]
pub struct EngineArgs {
    /// Factor to test; repeat for several (defaults to every factor)
    #[arg(long = "factor")]
    pub factors: Vec<String>,
    #[arg(long, default_value_t = 30)]
    pub min_factor_sample: usize,
    #[arg(long, default_value_t = 50)]
    pub min_segment_sample: usize,
    #[arg(long, default_value_t = 20)]
    pub min_rep_deals: usize,
    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,
    #[arg(long, default_value_t = 0.85)]
    pub decline_threshold: f64,
    #[arg(long, default_value_t = 0.25)]
    pub bottom_quantile: f64,
    #[arg(long, default_value_t = 0.75)]
    pub top_quantile: f64,
}

impl EngineArgs {
    pub fn into_config(self) -> Result<EngineConfig, EngineError> {
        let defaults = EngineConfig::default();
        let factors = if self.factors.is_empty() {
            defaults.factors.clone()
        } else {
            Factor::parse_list(&self.factors)?
        };
        let config = EngineConfig {
            factors,
            min_factor_sample: self.min_factor_sample,
            min_segment_sample: self.min_segment_sample,
            min_rep_deals: self.min_rep_deals,
            alpha: self.alpha,
            decline_threshold: self.decline_threshold,
            bottom_quantile: self.bottom_quantile,
            top_quantile: self.top_quantile,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }
}
