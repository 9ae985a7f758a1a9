//! Engine Configuration
//!
//! Tunables that shape classification, testing and presentation. Everything
//! has a default, so a partial JSON file only overrides what it names.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Lower bounds (in percent) of the magnitude tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignificanceThresholds {
    pub extreme: f64,
    pub large: f64,
    pub medium: f64,
    pub small: f64,
}

impl Default for SignificanceThresholds {
    fn default() -> Self {
        Self {
            extreme: 100.0,
            large: 50.0,
            medium: 20.0,
            small: 5.0,
        }
    }
}

impl SignificanceThresholds {
    pub fn validate(&self) -> Result<()> {
        let ordered = self.extreme >= self.large && self.large >= self.medium && self.medium >= self.small;
        if !ordered || self.small < 0.0 {
            return Err(AnalysisError::InvalidRequest(format!(
                "significance thresholds must be non-negative and descending: {:?}",
                self
            )));
        }
        Ok(())
    }
}

/// Which mean-difference test decides statistical significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeanDifferenceTest {
    /// One-sample t-test of the per-group deltas against zero.
    OneSampleDelta,
    /// Welch two-sample t-test of the raw before values against the raw after values.
    Welch,
}

impl Default for MeanDifferenceTest {
    fn default() -> Self {
        MeanDifferenceTest::OneSampleDelta
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub thresholds: SignificanceThresholds,

    pub mean_difference_test: MeanDifferenceTest,

    /// Minimum sample size for any statistical test
    pub min_observations: usize,

    /// Records summarised individually in the insight list
    pub insight_top_n: usize,

    /// Sub-groups named in a record's reason text, per breakdown column
    pub reason_top_n: usize,

    pub bar_chart_top_k: usize,

    pub histogram_min_bins: usize,
    pub histogram_max_bins: usize,

    /// Net change below `noise_ratio * sum(|before|)` is reported as flat
    pub noise_ratio: f64,

    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: SignificanceThresholds::default(),
            mean_difference_test: MeanDifferenceTest::default(),
            min_observations: 3,
            insight_top_n: 3,
            reason_top_n: 3,
            bar_chart_top_k: 30,
            histogram_min_bins: 5,
            histogram_max_bins: 30,
            noise_ratio: 0.01,
            parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.validate()?;
        if self.min_observations < 3 {
            return Err(AnalysisError::InvalidRequest(
                "min_observations must be at least 3".to_string(),
            ));
        }
        if self.histogram_min_bins == 0 || self.histogram_min_bins > self.histogram_max_bins {
            return Err(AnalysisError::InvalidRequest(format!(
                "histogram bin bounds are inconsistent: {}..{}",
                self.histogram_min_bins, self.histogram_max_bins
            )));
        }
        if !(self.noise_ratio >= 0.0) {
            return Err(AnalysisError::InvalidRequest(
                "noise_ratio must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"thresholds": {"large": 40.0}, "mean_difference_test": "welch"}"#).unwrap();
        assert_eq!(config.thresholds.large, 40.0);
        assert_eq!(config.thresholds.extreme, 100.0);
        assert_eq!(config.mean_difference_test, MeanDifferenceTest::Welch);
        assert_eq!(config.min_observations, 3);
        assert!(config.parallel);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let thresholds = SignificanceThresholds {
            extreme: 10.0,
            large: 50.0,
            medium: 20.0,
            small: 5.0,
        };
        assert!(thresholds.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"insight_top_n": 5, "parallel": false}}"#).unwrap();
        let config = EngineConfig::load(file.path()).unwrap();
        assert_eq!(config.insight_top_n, 5);
        assert!(!config.parallel);
    }
}
