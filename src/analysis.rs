//! Analysis Orchestration
//!
//! Validates a request against both snapshots, runs aggregation and diffing,
//! fans out the independent sub-analyses and assembles one immutable
//! `AnalysisResult`. Fatal problems surface before any result exists.

use crate::aggregate::{AggMethod, Aggregator};
use crate::charts::{ChartDataBuilder, ChartsData};
use crate::config::EngineConfig;
use crate::dataset::{ColumnKind, TabularDataset};
use crate::diff::{DiffEngine, DiffRecord};
use crate::drilldown::{BreakdownDecomposer, BreakdownOutcome};
use crate::error::{AnalysisError, Result, Warning, WarningKind};
use crate::narrative::{InsightContext, InsightGenerator};
use crate::parallel::join;
use crate::stats::{
    CorrelationAnalyzer, CorrelationReport, StatisticalTestResult, StatisticalTester, TrendAnalyzer, TrendReport,
    VarianceAnalyzer, VarianceReport,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedOptions {
    pub enable_statistical_tests: bool,
    pub enable_trend_analysis: bool,
    pub enable_correlation_analysis: bool,
    pub significance_level: f64,
}

impl Default for AdvancedOptions {
    fn default() -> Self {
        Self {
            enable_statistical_tests: true,
            enable_trend_analysis: true,
            enable_correlation_analysis: true,
            significance_level: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub group_by_col: String,
    pub value_col: String,
    pub agg_method: AggMethod,
    #[serde(default)]
    pub breakdown_cols: Vec<String>,
    #[serde(default)]
    pub advanced_options: AdvancedOptions,
}

impl AnalysisRequest {
    pub fn new(group_by_col: impl Into<String>, value_col: impl Into<String>, agg_method: AggMethod) -> Self {
        Self {
            group_by_col: group_by_col.into(),
            value_col: value_col.into(),
            agg_method,
            breakdown_cols: Vec::new(),
            advanced_options: AdvancedOptions::default(),
        }
    }

    pub fn with_breakdown(mut self, columns: &[&str]) -> Self {
        self.breakdown_cols = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_items: usize,
    pub positive_changes: usize,
    pub negative_changes: usize,
    pub total_increase: f64,
    pub total_decrease: f64,
    pub net_change: f64,
    pub analysis_timestamp: String,
}

impl AnalysisSummary {
    /// `net_change` is summed in record order.
    pub fn from_records(records: &[DiffRecord], analysis_timestamp: String) -> Self {
        let mut summary = Self {
            total_items: records.len(),
            positive_changes: 0,
            negative_changes: 0,
            total_increase: 0.0,
            total_decrease: 0.0,
            net_change: 0.0,
            analysis_timestamp,
        };
        for record in records {
            if record.delta > 0.0 {
                summary.positive_changes += 1;
                summary.total_increase += record.delta;
            } else if record.delta < 0.0 {
                summary.negative_changes += 1;
                summary.total_decrease += record.delta;
            }
            summary.net_change += record.delta;
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub processing_time_seconds: f64,
    pub rows_analyzed: usize,
    /// "advanced" when any optional analysis ran, else "basic"
    pub analysis_type: String,
    pub analyses_run: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub summary: AnalysisSummary,
    pub detailed_results: Vec<DiffRecord>,
    pub charts_data: ChartsData,
    pub insights: Vec<String>,
    pub performance_metrics: PerformanceMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistical_tests: Option<StatisticalTestResult>,
    pub variance_analysis: VarianceReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_analysis: Option<CorrelationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trend_analysis: Option<TrendReport>,
    pub warnings: Vec<Warning>,
}

/// Optional analysis output plus the warning explaining its absence.
type Optional<T> = (Option<T>, Option<Warning>);

pub struct AnalysisOrchestrator {
    config: EngineConfig,
}

impl Default for AnalysisOrchestrator {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl AnalysisOrchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn analyze(
        &self,
        before: &TabularDataset,
        after: &TabularDataset,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult> {
        self.config.validate()?;
        Self::validate(before, after, request)?;

        let started = Instant::now();
        let parallel = self.config.parallel;
        let options = &request.advanced_options;
        info!(
            "Analyzing {} by {} ({}), {} + {} rows",
            request.value_col,
            request.group_by_col,
            request.agg_method,
            before.height(),
            after.height()
        );

        // Aggregate both sides
        let aggregator = Aggregator::new(request.agg_method);
        let (before_aggs, after_aggs) = join(
            parallel,
            || aggregator.aggregate(before, &request.group_by_col, &request.value_col),
            || aggregator.aggregate(after, &request.group_by_col, &request.value_col),
        );
        let (before_aggs, after_aggs) = (before_aggs?, after_aggs?);
        debug!("Aggregated {} / {} groups", before_aggs.len(), after_aggs.len());

        // Diff
        let mut records = DiffEngine::new(self.config.thresholds).compare(&before_aggs, &after_aggs);
        let deltas: Vec<f64> = records.iter().map(|r| r.delta).collect();
        debug!("Diffed {} groups", records.len());

        // Independent sub-analyses
        let ((statistics, variance), (breakdown, (correlation, trend))) = join(
            parallel,
            || {
                join(
                    parallel,
                    || self.statistics(before, after, request, &deltas),
                    || VarianceAnalyzer.analyze(&deltas),
                )
            },
            || {
                join(
                    parallel,
                    || self.breakdown(before, after, request, &records),
                    || {
                        join(
                            parallel,
                            || Self::correlation(before, after, options.enable_correlation_analysis),
                            || Self::trend(before, after, request),
                        )
                    },
                )
            },
        );
        let statistics = statistics?;
        let breakdown = breakdown?;

        let mut warnings = breakdown.warnings;
        let mut analyses_run = vec!["aggregation".to_string(), "diff".to_string(), "variance".to_string()];
        if let Some(stats) = &statistics {
            if stats.insufficient_data {
                warnings.push(Warning::new(
                    WarningKind::InsufficientData,
                    format!(
                        "statistical tests need at least {} observations; got {}",
                        self.config.min_observations, stats.sample_size
                    ),
                ));
            } else {
                analyses_run.push("statistical_tests".to_string());
            }
        }
        if !request.breakdown_cols.is_empty() {
            analyses_run.push("breakdown".to_string());
        }
        let (correlation, correlation_warning) = correlation;
        let (trend, trend_warning) = trend;
        warnings.extend(correlation_warning);
        warnings.extend(trend_warning);
        if correlation.is_some() {
            analyses_run.push("correlation".to_string());
        }
        if trend.is_some() {
            analyses_run.push("trend".to_string());
        }
        for w in &warnings {
            warn!("{:?}: {}", w.kind, w.message);
        }

        for (record, breakdowns) in records.iter_mut().zip(breakdown.per_record) {
            record.breakdown = breakdowns;
        }

        let summary = AnalysisSummary::from_records(&records, Utc::now().to_rfc3339());

        let generator = InsightGenerator::new(
            self.config.insight_top_n,
            self.config.reason_top_n,
            self.config.noise_ratio,
        );
        generator.annotate(&mut records, !request.breakdown_cols.is_empty());
        let insights = generator.generate(&InsightContext {
            summary: &summary,
            records: &records,
            statistics: statistics.as_ref(),
            variance: &variance,
        });

        let charts_data = ChartDataBuilder::new(
            self.config.bar_chart_top_k,
            self.config.histogram_min_bins,
            self.config.histogram_max_bins,
        )
        .build(&records, trend.as_ref());

        let analysis_type = if analyses_run.len() > 3 { "advanced" } else { "basic" };
        let processing_time_seconds = started.elapsed().as_secs_f64();
        info!(
            "Analysis complete: {} groups, net change {:+}, {:.3}s",
            records.len(),
            summary.net_change,
            processing_time_seconds
        );

        Ok(AnalysisResult {
            summary,
            detailed_results: records,
            charts_data,
            insights,
            performance_metrics: PerformanceMetrics {
                processing_time_seconds,
                rows_analyzed: before.height() + after.height(),
                analysis_type: analysis_type.to_string(),
                analyses_run,
            },
            statistical_tests: statistics,
            variance_analysis: variance,
            correlation_analysis: correlation,
            trend_analysis: trend,
            warnings,
        })
    }

    /// Fatal checks: both key columns on both sides, numeric values where the
    /// method needs them, a sane significance level.
    pub fn validate(before: &TabularDataset, after: &TabularDataset, request: &AnalysisRequest) -> Result<()> {
        let alpha = request.advanced_options.significance_level;
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(AnalysisError::InvalidRequest(format!(
                "significance_level must be between 0 and 1, got {}",
                alpha
            )));
        }

        for (side, dataset) in [("before", before), ("after", after)] {
            for column in [&request.group_by_col, &request.value_col] {
                if !dataset.has_column(column) {
                    return Err(AnalysisError::Schema(format!(
                        "column '{}' not found in the {} dataset",
                        column, side
                    )));
                }
            }
            if request.agg_method.requires_numeric() {
                let kind = dataset.column_kind(&request.value_col)?;
                if kind != ColumnKind::Numeric {
                    return Err(AnalysisError::Type(format!(
                        "column '{}' in the {} dataset is {:?}; {} needs a numeric column",
                        request.value_col, side, kind, request.agg_method
                    )));
                }
            }
        }
        Ok(())
    }

    fn statistics(
        &self,
        before: &TabularDataset,
        after: &TabularDataset,
        request: &AnalysisRequest,
        deltas: &[f64],
    ) -> Result<Option<StatisticalTestResult>> {
        if !request.advanced_options.enable_statistical_tests {
            return Ok(None);
        }
        let raw = |dataset: &TabularDataset| -> Result<Vec<f64>> {
            match dataset.column_kind(&request.value_col)? {
                ColumnKind::Numeric => Ok(dataset
                    .numeric_values(&request.value_col)?
                    .into_iter()
                    .flatten()
                    .collect()),
                _ => Ok(Vec::new()),
            }
        };
        let tester = StatisticalTester::new(
            request.advanced_options.significance_level,
            self.config.mean_difference_test,
            self.config.min_observations,
        );
        Ok(Some(tester.run(&raw(before)?, &raw(after)?, deltas)))
    }

    fn breakdown(
        &self,
        before: &TabularDataset,
        after: &TabularDataset,
        request: &AnalysisRequest,
        records: &[DiffRecord],
    ) -> Result<BreakdownOutcome> {
        if request.breakdown_cols.is_empty() {
            return Ok(BreakdownOutcome {
                per_record: vec![Vec::new(); records.len()],
                warnings: Vec::new(),
            });
        }
        BreakdownDecomposer::new(request.agg_method).decompose(
            before,
            after,
            &request.group_by_col,
            &request.value_col,
            &request.breakdown_cols,
            records,
        )
    }

    fn correlation(before: &TabularDataset, after: &TabularDataset, enabled: bool) -> Optional<CorrelationReport> {
        if !enabled {
            return (None, None);
        }
        match CorrelationAnalyzer.analyze(before, after) {
            Ok(Some(report)) => (Some(report), None),
            Ok(None) => (
                None,
                Some(Warning::new(
                    WarningKind::CorrelationUnavailable,
                    "correlation analysis needs at least two shared numeric columns",
                )),
            ),
            Err(e) => (
                None,
                Some(Warning::new(WarningKind::CorrelationUnavailable, e.to_string())),
            ),
        }
    }

    fn trend(before: &TabularDataset, after: &TabularDataset, request: &AnalysisRequest) -> Optional<TrendReport> {
        if !request.advanced_options.enable_trend_analysis {
            return (None, None);
        }
        let unavailable = |message: String| (None, Some(Warning::new(WarningKind::TrendUnavailable, message)));

        let date_col = match TrendAnalyzer::detect_date_column(before) {
            Ok(Some(col)) => col,
            // No date column is the common case, not a degradation.
            Ok(None) => return (None, None),
            Err(e) => return unavailable(e.to_string()),
        };
        if !after.has_column(&date_col) {
            return unavailable(format!("date column '{}' is missing from the after dataset", date_col));
        }
        let numeric = [before, after]
            .iter()
            .all(|d| matches!(d.column_kind(&request.value_col), Ok(ColumnKind::Numeric)));
        if !numeric {
            return unavailable(format!(
                "trend analysis needs a numeric value column; '{}' is not numeric",
                request.value_col
            ));
        }

        match TrendAnalyzer.analyze(before, after, &date_col, &request.value_col) {
            Ok(report) => (Some(report), None),
            Err(e) => unavailable(e.to_string()),
        }
    }
}
