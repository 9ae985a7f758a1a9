//! Insight Narrative
//!
//! Rule-based sentences over already-computed results. Everything here is a
//! pure function of its inputs, so the wording can be swapped without
//! touching the numeric core.

use crate::analysis::AnalysisSummary;
use crate::diff::DiffRecord;
use crate::drilldown::{BreakdownContribution, ColumnBreakdown};
use crate::stats::{StatisticalTestResult, VarianceReport};

/// Deltas beyond this magnitude are reported as anomalies instead of numbers.
const ANOMALY_LIMIT: f64 = 1e10;

pub const NO_BREAKDOWN_REQUESTED: &str = "詳細分析なし";
pub const NO_SIGNIFICANT_FACTOR: &str = "有意な変動要因なし";

/// Inputs the insight rules look at.
pub struct InsightContext<'a> {
    pub summary: &'a AnalysisSummary,
    pub records: &'a [DiffRecord],
    pub statistics: Option<&'a StatisticalTestResult>,
    pub variance: &'a VarianceReport,
}

pub struct InsightGenerator {
    pub top_n: usize,
    pub reason_top_n: usize,
    pub noise_ratio: f64,
}

impl InsightGenerator {
    pub fn new(top_n: usize, reason_top_n: usize, noise_ratio: f64) -> Self {
        Self {
            top_n,
            reason_top_n,
            noise_ratio,
        }
    }

    /// Fill in `reason_text` on every record from its breakdowns.
    pub fn annotate(&self, records: &mut [DiffRecord], breakdown_requested: bool) {
        for record in records.iter_mut() {
            record.reason_text = self.reason_text(&record.breakdown, breakdown_requested);
        }
    }

    pub fn reason_text(&self, breakdowns: &[ColumnBreakdown], breakdown_requested: bool) -> String {
        if !breakdown_requested {
            return NO_BREAKDOWN_REQUESTED.to_string();
        }

        let reasons: Vec<String> = breakdowns
            .iter()
            .filter_map(|b| self.column_reason(b))
            .collect();

        if reasons.is_empty() {
            NO_SIGNIFICANT_FACTOR.to_string()
        } else {
            reasons.join(" / ")
        }
    }

    /// Sub-groups whose delta exceeds one standard deviation of the column's
    /// deltas; "大幅" beyond two.
    fn column_reason(&self, breakdown: &ColumnBreakdown) -> Option<String> {
        let std = breakdown.stats.std_dev?;
        let parts: Vec<String> = breakdown
            .contributions
            .iter()
            .filter(|c| c.delta.abs() > std)
            .take(self.reason_top_n)
            .map(|c| describe_contribution(c, std))
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(format!("[{}] {}", breakdown.column, parts.join("｜")))
        }
    }

    pub fn generate(&self, ctx: &InsightContext<'_>) -> Vec<String> {
        let mut insights = Vec::new();
        if ctx.records.is_empty() {
            return insights;
        }

        if ctx.records.iter().all(|r| r.delta == 0.0) {
            insights.push(format!(
                "有意な変化は検出されませんでした（全{}項目で増減なし）",
                ctx.records.len()
            ));
            return insights;
        }

        insights.push(balance_sentence(ctx.summary));

        if let Some(cv) = ctx.variance.coefficient_of_variation {
            if cv > 1.0 {
                insights.push("変動が非常に大きく、項目間での差が顕著です".to_string());
            } else if cv < 0.3 {
                insights.push("変動が比較的小さく、安定した変化パターンです".to_string());
            }
        }

        if let Some(stats) = ctx.statistics.filter(|s| s.rejects_null()) {
            let p = stats.mean_difference.p_value.unwrap_or(0.0);
            insights.push(format!(
                "統計的に有意な変化が検出されました（p = {:.4} < {}）",
                p, stats.significance_level
            ));
        }

        insights.extend(
            ctx.records
                .iter()
                .filter(|r| r.delta != 0.0)
                .take(self.top_n)
                .enumerate()
                .map(|(rank, r)| record_sentence(rank + 1, r)),
        );

        if let Some(sentence) = self.trend_sentence(ctx) {
            insights.push(sentence);
        }

        insights
    }

    fn trend_sentence(&self, ctx: &InsightContext<'_>) -> Option<String> {
        let net = ctx.summary.net_change;
        let baseline: f64 = ctx.records.iter().map(|r| r.before_value.abs()).sum();
        if net == 0.0 || net.abs() <= self.noise_ratio * baseline {
            return None;
        }
        let direction = if net > 0.0 { "純増" } else { "純減" };
        if baseline > 0.0 {
            Some(format!(
                "全体として{:+.0}の{}です（期首合計比 {:+.1}%）",
                net,
                direction,
                net / baseline * 100.0
            ))
        } else {
            Some(format!("全体として{:+.0}の{}です", net, direction))
        }
    }
}

fn describe_contribution(c: &BreakdownContribution, std: f64) -> String {
    if c.delta.abs() > ANOMALY_LIMIT {
        return format!("{} 異常値検出", c.sub_key);
    }
    let impact = if c.delta.abs() > std * 2.0 { "大幅" } else { "中程度" };
    let direction = if c.delta > 0.0 { "増加" } else { "減少" };
    format!(
        "{} {:.0}→{:.0} ({:+.0}, {}{})",
        c.sub_key, c.before_value, c.after_value, c.delta, impact, direction
    )
}

fn balance_sentence(summary: &AnalysisSummary) -> String {
    let up = summary.positive_changes;
    let down = summary.negative_changes;
    if up > down * 2 {
        "全体的に改善傾向が見られます（増加項目が減少項目の2倍以上）".to_string()
    } else if down > up * 2 {
        "全体的に悪化傾向が見られます（減少項目が増加項目の2倍以上）".to_string()
    } else {
        "増加・減少項目がバランスしており、構造的な変化が示唆されます".to_string()
    }
}

fn record_sentence(rank: usize, record: &DiffRecord) -> String {
    let rate = match record.rate {
        Some(r) => format!("{:+.1}%", r),
        None => "差異率算出不可".to_string(),
    };
    let mut sentence = format!(
        "変動要因{}位: {} {:.0}→{:.0} ({:+.0}, {}, {})",
        rank, record.group_key, record.before_value, record.after_value, record.delta, rate, record.significance
    );
    if let Some((column, top)) = record
        .breakdown
        .iter()
        .find_map(|b| b.top_contributor().map(|c| (&b.column, c)))
    {
        sentence.push_str(&format!(" 主因: [{}] {} ({:+.0})", column, top.sub_key, top.delta));
    }
    sentence
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::GroupKey;
    use crate::diff::{Presence, Significance};
    use crate::drilldown::BreakdownStats;

    fn record(key: &str, before: f64, after: f64) -> DiffRecord {
        let delta = after - before;
        DiffRecord {
            group_key: GroupKey::from(key),
            before_value: before,
            after_value: after,
            delta,
            rate: crate::diff::rate_of(before, delta),
            significance: Significance::Minor,
            presence: Presence::Both,
            breakdown: Vec::new(),
            reason_text: String::new(),
        }
    }

    fn summary(records: &[DiffRecord]) -> AnalysisSummary {
        AnalysisSummary::from_records(records, "2026-01-01T00:00:00Z".to_string())
    }

    fn contribution(key: &str, before: f64, after: f64) -> BreakdownContribution {
        BreakdownContribution {
            sub_key: GroupKey::from(key),
            before_value: before,
            after_value: after,
            delta: after - before,
            share_of_parent_delta: 0.0,
        }
    }

    fn breakdown(contributions: Vec<BreakdownContribution>) -> ColumnBreakdown {
        let deltas: Vec<f64> = contributions.iter().map(|c| c.delta).collect();
        let std = crate::stats::sample_variance(&deltas).map(f64::sqrt);
        ColumnBreakdown {
            column: "region".to_string(),
            stats: BreakdownStats {
                total_items: deltas.len(),
                positive_items: 0,
                negative_items: 0,
                zero_items: 0,
                std_dev: std,
                variance: std.map(|s| s * s),
            },
            contributions,
        }
    }

    fn generator() -> InsightGenerator {
        InsightGenerator::new(3, 3, 0.01)
    }

    #[test]
    fn test_reason_without_breakdown_request() {
        assert_eq!(generator().reason_text(&[], false), NO_BREAKDOWN_REQUESTED);
        assert_eq!(generator().reason_text(&[], true), NO_SIGNIFICANT_FACTOR);
    }

    #[test]
    fn test_reason_names_outlying_sub_groups() {
        let b = breakdown(vec![
            contribution("east", 100.0, 200.0),
            contribution("west", 50.0, 52.0),
            contribution("north", 30.0, 31.0),
            contribution("south", 10.0, 9.0),
        ]);
        let text = generator().reason_text(&[b], true);
        assert_eq!(text, "[region] east 100→200 (+100, 大幅増加)");
    }

    #[test]
    fn test_reason_flags_anomalies() {
        let b = breakdown(vec![contribution("x", 0.0, 5e10), contribution("y", 0.0, 0.0), contribution("z", 0.0, 1.0)]);
        let text = generator().reason_text(&[b], true);
        assert!(text.contains("x 異常値検出"));
    }

    #[test]
    fn test_empty_records_yield_no_insights() {
        let records: Vec<DiffRecord> = Vec::new();
        let s = summary(&records);
        let variance = VarianceReport::default();
        let ctx = InsightContext {
            summary: &s,
            records: &records,
            statistics: None,
            variance: &variance,
        };
        assert!(generator().generate(&ctx).is_empty());
    }

    #[test]
    fn test_unchanged_records_report_no_change() {
        let records = vec![record("A", 10.0, 10.0), record("B", 5.0, 5.0)];
        let s = summary(&records);
        let variance = VarianceReport::default();
        let ctx = InsightContext {
            summary: &s,
            records: &records,
            statistics: None,
            variance: &variance,
        };
        let insights = generator().generate(&ctx);
        assert_eq!(insights.len(), 1);
        assert!(insights[0].contains("有意な変化は検出されませんでした"));
    }

    #[test]
    fn test_top_records_and_trend() {
        let mut records = vec![record("A", 100.0, 150.0), record("C", 0.0, 20.0), record("B", 50.0, 50.0)];
        records[0].breakdown = vec![breakdown(vec![contribution("east", 60.0, 100.0), contribution("west", 40.0, 50.0)])];
        let s = summary(&records);
        let variance = VarianceReport::default();
        let ctx = InsightContext {
            summary: &s,
            records: &records,
            statistics: None,
            variance: &variance,
        };
        let insights = generator().generate(&ctx);
        assert!(insights[0].contains("改善傾向"));
        assert_eq!(
            insights[1],
            "変動要因1位: A 100→150 (+50, +50.0%, 微小) 主因: [region] east (+40)"
        );
        assert!(insights[2].starts_with("変動要因2位: C 0→20 (+20, 差異率算出不可"));
        assert_eq!(insights.last().unwrap(), "全体として+70の純増です（期首合計比 +46.7%）");
        assert!(!insights.iter().any(|i| i.contains("B ")));
    }

    #[test]
    fn test_deterministic() {
        let records = vec![record("A", 1.0, 3.0), record("B", 4.0, 1.0)];
        let s = summary(&records);
        let variance = VarianceReport::default();
        let ctx = InsightContext {
            summary: &s,
            records: &records,
            statistics: None,
            variance: &variance,
        };
        assert_eq!(generator().generate(&ctx), generator().generate(&ctx));
    }
}
