//! Correlation Analysis
//!
//! Pearson correlation between every pair of numeric columns shared by the
//! two snapshots, and how each coefficient moved.

use crate::dataset::{ColumnKind, TabularDataset};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type CorrelationMatrix = BTreeMap<String, BTreeMap<String, Option<f64>>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationReport {
    pub columns: Vec<String>,
    pub before_correlations: CorrelationMatrix,
    pub after_correlations: CorrelationMatrix,
    pub correlation_changes: CorrelationMatrix,
}

pub struct CorrelationAnalyzer;

impl CorrelationAnalyzer {
    /// Numeric columns present in both datasets, in "before" column order.
    pub fn shared_numeric_columns(before: &TabularDataset, after: &TabularDataset) -> Vec<String> {
        before
            .columns_of_kind(ColumnKind::Numeric)
            .into_iter()
            .filter(|c| matches!(after.column_kind(c), Ok(ColumnKind::Numeric)))
            .collect()
    }

    /// `None` when fewer than two numeric columns are shared.
    pub fn analyze(&self, before: &TabularDataset, after: &TabularDataset) -> Result<Option<CorrelationReport>> {
        let columns = Self::shared_numeric_columns(before, after);
        if columns.len() < 2 {
            return Ok(None);
        }

        let before_correlations = Self::matrix(before, &columns)?;
        let after_correlations = Self::matrix(after, &columns)?;

        let mut correlation_changes = CorrelationMatrix::new();
        for row in &columns {
            let mut changes = BTreeMap::new();
            for col in &columns {
                let b = before_correlations[row][col];
                let a = after_correlations[row][col];
                let change = match (b, a) {
                    (Some(b), Some(a)) => Some(a - b),
                    _ => None,
                };
                changes.insert(col.clone(), change);
            }
            correlation_changes.insert(row.clone(), changes);
        }

        Ok(Some(CorrelationReport {
            columns,
            before_correlations,
            after_correlations,
            correlation_changes,
        }))
    }

    fn matrix(dataset: &TabularDataset, columns: &[String]) -> Result<CorrelationMatrix> {
        let values: Vec<Vec<Option<f64>>> = columns
            .iter()
            .map(|c| dataset.numeric_values(c))
            .collect::<Result<_>>()?;

        let mut matrix = CorrelationMatrix::new();
        for (i, row) in columns.iter().enumerate() {
            let mut entries = BTreeMap::new();
            for (j, col) in columns.iter().enumerate() {
                entries.insert(col.clone(), pearson(&values[i], &values[j]));
            }
            matrix.insert(row.clone(), entries);
        }
        Ok(matrix)
    }
}

/// Pearson's r over rows where both values are present. Undefined (None)
/// below two complete pairs or when either side has no spread.
pub fn pearson(x: &[Option<f64>], y: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .collect();
    if pairs.len() < 2 {
        return None;
    }
    let n = pairs.len() as f64;
    let mx = pairs.iter().map(|p| p.0).sum::<f64>() / n;
    let my = pairs.iter().map(|p| p.1).sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in &pairs {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return None;
    }
    Some((sxy / (sxx * syy).sqrt()).clamp(-1.0, 1.0))
}
