//! Statistical Testing
//!
//! Normality, mean-difference and descriptive moments, computed once per
//! analysis run. Below the minimum sample size every field is null and
//! `insufficient_data` is set, so "not computed" never reads as "no effect".

use crate::config::MeanDifferenceTest;
use crate::stats::normality::shapiro_wilk;
use crate::stats::{mean, percentile, sample_variance};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalityTest {
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub is_normal: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanDifference {
    pub method: MeanDifferenceTest,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub degrees_of_freedom: Option<f64>,
    pub significant: Option<bool>,
}

impl MeanDifference {
    fn empty(method: MeanDifferenceTest) -> Self {
        Self {
            method,
            statistic: None,
            p_value: None,
            degrees_of_freedom: None,
            significant: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescriptiveStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub median: Option<f64>,
    pub skewness: Option<f64>,
    pub kurtosis: Option<f64>,
}

impl DescriptiveStats {
    /// Population moments; skewness and excess kurtosis are the biased forms.
    pub fn from_values(values: &[f64]) -> Self {
        let Some(m) = mean(values) else {
            return Self::default();
        };
        let n = values.len() as f64;
        let central = |k: i32| values.iter().map(|v| (v - m).powi(k)).sum::<f64>() / n;
        let m2 = central(2);

        let (skewness, kurtosis) = if m2 > 0.0 {
            let skew = central(3) / m2.powf(1.5);
            let kurt = if values.len() > 3 { central(4) / (m2 * m2) - 3.0 } else { 0.0 };
            (Some(skew), Some(kurt))
        } else {
            (None, None)
        };

        Self {
            mean: Some(m),
            std: Some(m2.sqrt()),
            median: percentile(values, 50.0),
            skewness,
            kurtosis,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticalTestResult {
    pub normality_test: NormalityTest,
    #[serde(rename = "t_test")]
    pub mean_difference: MeanDifference,
    pub descriptive_stats: DescriptiveStats,
    pub sample_size: usize,
    pub significance_level: f64,
    pub insufficient_data: bool,
}

impl StatisticalTestResult {
    /// True only when the test ran and rejected the null.
    pub fn rejects_null(&self) -> bool {
        !self.insufficient_data && self.mean_difference.significant == Some(true)
    }
}

pub struct StatisticalTester {
    pub alpha: f64,
    pub method: MeanDifferenceTest,
    pub min_observations: usize,
}

impl StatisticalTester {
    pub fn new(alpha: f64, method: MeanDifferenceTest, min_observations: usize) -> Self {
        Self {
            alpha,
            method,
            min_observations,
        }
    }

    /// `before`/`after` are the raw non-null values of each side; `deltas` are
    /// the per-group changes.
    pub fn run(&self, before: &[f64], after: &[f64], deltas: &[f64]) -> StatisticalTestResult {
        let enough = match self.method {
            MeanDifferenceTest::OneSampleDelta => deltas.len() >= self.min_observations,
            MeanDifferenceTest::Welch => {
                deltas.len() >= self.min_observations
                    && before.len() >= self.min_observations
                    && after.len() >= self.min_observations
            }
        };

        if !enough {
            debug!(
                "Skipping statistical tests: {} deltas, {} / {} raw values",
                deltas.len(),
                before.len(),
                after.len()
            );
            return StatisticalTestResult {
                normality_test: NormalityTest::default(),
                mean_difference: MeanDifference::empty(self.method),
                descriptive_stats: DescriptiveStats::default(),
                sample_size: deltas.len(),
                significance_level: self.alpha,
                insufficient_data: true,
            };
        }

        let normality_test = match shapiro_wilk(deltas) {
            Some(sw) => NormalityTest {
                statistic: Some(sw.w),
                p_value: Some(sw.p_value),
                is_normal: Some(sw.p_value > self.alpha),
            },
            None => NormalityTest::default(),
        };

        let mean_difference = match self.method {
            MeanDifferenceTest::OneSampleDelta => self.one_sample(deltas),
            MeanDifferenceTest::Welch => self.welch(before, after),
        };

        StatisticalTestResult {
            normality_test,
            mean_difference,
            descriptive_stats: DescriptiveStats::from_values(deltas),
            sample_size: deltas.len(),
            significance_level: self.alpha,
            insufficient_data: false,
        }
    }

    /// One-sample t-test of the deltas against zero.
    fn one_sample(&self, deltas: &[f64]) -> MeanDifference {
        let n = deltas.len() as f64;
        let (Some(m), Some(var)) = (mean(deltas), sample_variance(deltas)) else {
            return MeanDifference::empty(self.method);
        };
        self.finish(m, var / n, n - 1.0)
    }

    /// Welch's unequal-variance t-test, after minus before.
    fn welch(&self, before: &[f64], after: &[f64]) -> MeanDifference {
        let (Some(mb), Some(ma), Some(vb), Some(va)) =
            (mean(before), mean(after), sample_variance(before), sample_variance(after))
        else {
            return MeanDifference::empty(self.method);
        };
        let nb = before.len() as f64;
        let na = after.len() as f64;
        let se_b = vb / nb;
        let se_a = va / na;
        let se2 = se_b + se_a;
        let df_denominator = se_b.powi(2) / (nb - 1.0) + se_a.powi(2) / (na - 1.0);
        let df = if df_denominator > 0.0 { se2.powi(2) / df_denominator } else { nb + na - 2.0 };
        self.finish(ma - mb, se2, df)
    }

    /// Two-sided p-value for `difference / sqrt(se2)` with `df` degrees of freedom.
    fn finish(&self, difference: f64, se2: f64, df: f64) -> MeanDifference {
        if se2 <= 0.0 {
            // No spread: the statistic is undefined unless there is no difference at all.
            let (statistic, p_value) = if difference == 0.0 { (Some(0.0), 1.0) } else { (None, 0.0) };
            return MeanDifference {
                method: self.method,
                statistic,
                p_value: Some(p_value),
                degrees_of_freedom: Some(df),
                significant: Some(p_value < self.alpha),
            };
        }

        let t = difference / se2.sqrt();
        let p_value = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => Some((2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0)),
            Err(_) => None,
        };
        MeanDifference {
            method: self.method,
            statistic: Some(t),
            p_value,
            degrees_of_freedom: Some(df),
            significant: p_value.map(|p| p < self.alpha),
        }
    }
}
