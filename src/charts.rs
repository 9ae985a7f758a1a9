//! Chart Payloads
//!
//! Projects the diff output into the series a front end plots. No new
//! numbers are derived here beyond binning.

use crate::diff::DiffRecord;
use crate::stats::TrendReport;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const INCREASE_COLOR: &str = "#2E86AB";
pub const DECREASE_COLOR: &str = "#A23B72";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarChart {
    pub labels: Vec<String>,
    pub values: Vec<f64>,
    pub colors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScatterChart {
    pub x_values: Vec<f64>,
    pub y_values: Vec<f64>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin edges; one more than `frequencies`
    pub bins: Vec<f64>,
    pub frequencies: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendChart {
    pub before_trend: BTreeMap<String, f64>,
    pub after_trend: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartsData {
    pub difference_chart: BarChart,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scatter_chart: Option<ScatterChart>,
    pub histogram: Histogram,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_chart: Option<TrendChart>,
}

pub struct ChartDataBuilder {
    pub top_k: usize,
    pub min_bins: usize,
    pub max_bins: usize,
}

impl ChartDataBuilder {
    pub fn new(top_k: usize, min_bins: usize, max_bins: usize) -> Self {
        Self {
            top_k,
            min_bins,
            max_bins,
        }
    }

    /// `records` must already be ranked by |delta|.
    pub fn build(&self, records: &[DiffRecord], trend: Option<&TrendReport>) -> ChartsData {
        ChartsData {
            difference_chart: self.difference_chart(records),
            scatter_chart: Self::scatter_chart(records),
            histogram: self.histogram(&records.iter().map(|r| r.delta).collect::<Vec<_>>()),
            trend_chart: trend.map(|t| TrendChart {
                before_trend: t.before_trend.clone(),
                after_trend: t.after_trend.clone(),
            }),
        }
    }

    fn difference_chart(&self, records: &[DiffRecord]) -> BarChart {
        let top: Vec<&DiffRecord> = records.iter().take(self.top_k).collect();
        BarChart {
            labels: top.iter().map(|r| r.group_key.to_string()).collect(),
            values: top.iter().map(|r| r.delta).collect(),
            colors: top
                .iter()
                .map(|r| if r.delta >= 0.0 { INCREASE_COLOR } else { DECREASE_COLOR }.to_string())
                .collect(),
        }
    }

    fn scatter_chart(records: &[DiffRecord]) -> Option<ScatterChart> {
        let points: Vec<(&DiffRecord, f64)> = records
            .iter()
            .filter_map(|r| r.rate.map(|rate| (r, rate)))
            .collect();
        if points.is_empty() {
            return None;
        }
        Some(ScatterChart {
            x_values: points.iter().map(|(r, _)| r.delta).collect(),
            y_values: points.iter().map(|(_, rate)| *rate).collect(),
            labels: points.iter().map(|(r, _)| r.group_key.to_string()).collect(),
        })
    }

    pub fn bin_count(&self, n: usize) -> usize {
        let root = (n as f64).sqrt().floor() as usize;
        root.clamp(self.min_bins, self.max_bins)
    }

    /// Equal-width bins over [min, max]; the last bin is closed. A zero-width
    /// range is widened by 0.5 on each side.
    pub fn histogram(&self, values: &[f64]) -> Histogram {
        if values.is_empty() {
            return Histogram {
                bins: Vec::new(),
                frequencies: Vec::new(),
            };
        }

        let bins = self.bin_count(values.len());
        let mut lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let mut hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if lo == hi {
            lo -= 0.5;
            hi += 0.5;
        }
        let width = (hi - lo) / bins as f64;

        let edges: Vec<f64> = (0..=bins)
            .map(|i| if i == bins { hi } else { lo + width * i as f64 })
            .collect();
        let mut frequencies = vec![0usize; bins];
        for v in values {
            let idx = (((v - lo) / width).floor() as usize).min(bins - 1);
            frequencies[idx] += 1;
        }

        Histogram {
            bins: edges,
            frequencies,
        }
    }
}
