use crate::stats::{mean, percentile};
use serde::{Deserialize, Serialize};

/// Dispersion of the per-group deltas.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceReport {
    pub variance: Option<f64>,
    pub std_deviation: Option<f64>,
    /// std / |mean|; null when the mean delta is zero
    pub coefficient_of_variation: Option<f64>,
    pub range: Option<f64>,
    pub iqr: Option<f64>,
}

pub struct VarianceAnalyzer;

impl VarianceAnalyzer {
    pub fn analyze(&self, deltas: &[f64]) -> VarianceReport {
        let Some(m) = mean(deltas) else {
            return VarianceReport::default();
        };
        let n = deltas.len() as f64;
        let variance = deltas.iter().map(|d| (d - m).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        let min = deltas.iter().copied().fold(f64::INFINITY, f64::min);
        let max = deltas.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let iqr = match (percentile(deltas, 75.0), percentile(deltas, 25.0)) {
            (Some(q3), Some(q1)) => Some(q3 - q1),
            _ => None,
        };

        VarianceReport {
            variance: Some(variance),
            std_deviation: Some(std),
            coefficient_of_variation: if m != 0.0 { Some(std / m.abs()) } else { None },
            range: Some(max - min),
            iqr,
        }
    }
}
