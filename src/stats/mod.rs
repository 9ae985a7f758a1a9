//! Statistical analyses over the diff output and the raw value columns.

pub mod correlation;
pub mod normality;
pub mod testing;
pub mod trend;
pub mod variance;

pub use correlation::{CorrelationAnalyzer, CorrelationReport};
pub use testing::{StatisticalTestResult, StatisticalTester};
pub use trend::{TrendAnalyzer, TrendReport};
pub use variance::{VarianceAnalyzer, VarianceReport};

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Unbiased variance; undefined below two observations.
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let n = values.len() as f64;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1.0))
}

/// Percentile with linear interpolation between closest ranks (`q` in 0..=100).
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let position = (sorted.len() - 1) as f64 * (q / 100.0);
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_interpolates() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&values, 25.0), Some(1.75));
        assert_eq!(percentile(&values, 50.0), Some(2.5));
        assert_eq!(percentile(&values, 75.0), Some(3.25));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[1.0, 3.0]), Some(2.0));
        assert_eq!(sample_variance(&[1.0]), None);
    }
}
