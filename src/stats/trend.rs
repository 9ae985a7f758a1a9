//! Time Trend Analysis
//!
//! Finds a date-like column and buckets the value column by calendar month
//! on each side.

use crate::dataset::{ColumnKind, TabularDataset};
use crate::error::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"];

/// Values probed when deciding whether a text column holds dates.
const PROBE_ROWS: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub date_column: String,
    /// Month ("YYYY-MM") to summed value
    pub before_trend: BTreeMap<String, f64>,
    pub after_trend: BTreeMap<String, f64>,
    /// The before snapshot spans at least a year of months
    pub seasonality_detected: bool,
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    let head = trimmed.get(..10).unwrap_or(trimmed);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
        .or_else(|| {
            let compact = trimmed.get(..8)?;
            NaiveDate::parse_from_str(compact, "%Y%m%d").ok()
        })
}

pub struct TrendAnalyzer;

impl TrendAnalyzer {
    /// First temporal column, else the first column whose name mentions a
    /// date or time and whose leading values all parse as dates.
    pub fn detect_date_column(dataset: &TabularDataset) -> Result<Option<String>> {
        if let Some(col) = dataset.columns_of_kind(ColumnKind::Temporal).into_iter().next() {
            return Ok(Some(col));
        }

        for name in dataset.column_names() {
            let lower = name.to_lowercase();
            if !(lower.contains("date") || lower.contains("time")) {
                continue;
            }
            let probe: Vec<String> = dataset
                .text_values(&name)?
                .into_iter()
                .flatten()
                .take(PROBE_ROWS)
                .collect();
            if !probe.is_empty() && probe.iter().all(|v| parse_date(v).is_some()) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }

    pub fn analyze(
        &self,
        before: &TabularDataset,
        after: &TabularDataset,
        date_col: &str,
        value_col: &str,
    ) -> Result<TrendReport> {
        let before_trend = Self::monthly(before, date_col, value_col)?;
        let after_trend = Self::monthly(after, date_col, value_col)?;
        Ok(TrendReport {
            date_column: date_col.to_string(),
            seasonality_detected: before_trend.len() >= 12,
            before_trend,
            after_trend,
        })
    }

    /// Rows whose date fails to parse are left out.
    fn monthly(dataset: &TabularDataset, date_col: &str, value_col: &str) -> Result<BTreeMap<String, f64>> {
        let dates = dataset.text_values(date_col)?;
        let values = dataset.numeric_values(value_col)?;

        let mut buckets = BTreeMap::new();
        for (date, value) in dates.into_iter().zip(values) {
            let Some(month) = date.as_deref().and_then(parse_date) else {
                continue;
            };
            let entry = buckets.entry(month.format("%Y-%m").to_string()).or_insert(0.0);
            if let Some(v) = value {
                *entry += v;
            }
        }
        Ok(buckets)
    }
}
