use crate::aggregate::Aggregates;
use crate::config::SignificanceThresholds;
use crate::dataset::GroupKey;
use crate::drilldown::ColumnBreakdown;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

/// Ordered magnitude/novelty category of a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Significance {
    #[serde(rename = "新規")]
    New,
    #[serde(rename = "消失")]
    Disappeared,
    #[serde(rename = "極大")]
    Extreme,
    #[serde(rename = "大")]
    Large,
    #[serde(rename = "中")]
    Medium,
    #[serde(rename = "小")]
    Small,
    #[serde(rename = "微小")]
    Minor,
}

impl Significance {
    pub fn label(&self) -> &'static str {
        match self {
            Significance::New => "新規",
            Significance::Disappeared => "消失",
            Significance::Extreme => "極大",
            Significance::Large => "大",
            Significance::Medium => "中",
            Significance::Small => "小",
            Significance::Minor => "微小",
        }
    }

    /// Bucket a percentage magnitude into one of the five size tiers.
    pub fn from_magnitude(percent: f64, thresholds: &SignificanceThresholds) -> Self {
        if percent >= thresholds.extreme {
            Significance::Extreme
        } else if percent >= thresholds.large {
            Significance::Large
        } else if percent >= thresholds.medium {
            Significance::Medium
        } else if percent >= thresholds.small {
            Significance::Small
        } else {
            Significance::Minor
        }
    }
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Which snapshot(s) a group key was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    Both,
    BeforeOnly,
    AfterOnly,
}

/// One row of the before/after outer join, missing sides already zeroed.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedValue {
    pub group_key: GroupKey,
    pub before: f64,
    pub after: f64,
    pub presence: Presence,
}

impl JoinedValue {
    pub fn delta(&self) -> f64 {
        self.after - self.before
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
    pub group_key: GroupKey,

    #[serde(rename = "期首値")]
    pub before_value: f64,

    #[serde(rename = "期末値")]
    pub after_value: f64,

    #[serde(rename = "差額")]
    pub delta: f64,

    /// Percent change against |before|; null when before is zero
    #[serde(rename = "差異率")]
    pub rate: Option<f64>,

    pub significance: Significance,

    pub presence: Presence,

    #[serde(rename = "breakdown_data")]
    pub breakdown: Vec<ColumnBreakdown>,

    #[serde(rename = "増減理由")]
    pub reason_text: String,
}

/// Full outer join of two aggregate maps, ordered by key.
pub fn outer_join(before: &Aggregates, after: &Aggregates) -> Vec<JoinedValue> {
    let keys: BTreeSet<&GroupKey> = before.keys().chain(after.keys()).collect();
    keys.into_iter()
        .map(|key| {
            let b = before.get(key).map(|v| v.value);
            let a = after.get(key).map(|v| v.value);
            let presence = match (b.is_some(), a.is_some()) {
                (true, true) => Presence::Both,
                (true, false) => Presence::BeforeOnly,
                _ => Presence::AfterOnly,
            };
            JoinedValue {
                group_key: key.clone(),
                before: b.unwrap_or(0.0),
                after: a.unwrap_or(0.0),
                presence,
            }
        })
        .collect()
}

/// Descending |delta|, ties by ascending key.
pub fn rank_by_magnitude(a: (f64, &GroupKey), b: (f64, &GroupKey)) -> Ordering {
    b.0.abs()
        .total_cmp(&a.0.abs())
        .then_with(|| a.1.cmp(b.1))
}

pub fn rate_of(before: f64, delta: f64) -> Option<f64> {
    if before == 0.0 {
        None
    } else {
        Some(delta / before.abs() * 100.0)
    }
}

pub fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

pub struct DiffEngine {
    pub thresholds: SignificanceThresholds,
}

impl DiffEngine {
    pub fn new(thresholds: SignificanceThresholds) -> Self {
        Self { thresholds }
    }

    /// Outer-join before/after aggregates and classify each group's change.
    pub fn compare(&self, before: &Aggregates, after: &Aggregates) -> Vec<DiffRecord> {
        let joined = outer_join(before, after);
        let deltas: Vec<f64> = joined.iter().map(JoinedValue::delta).collect();
        let delta_std = population_std(&deltas);

        let mut records: Vec<DiffRecord> = joined
            .into_iter()
            .map(|row| {
                let delta = row.delta();
                let rate = rate_of(row.before, delta);
                let significance = self.classify(row.before, row.after, delta, rate, delta_std);
                DiffRecord {
                    group_key: row.group_key,
                    before_value: row.before,
                    after_value: row.after,
                    delta,
                    rate,
                    significance,
                    presence: row.presence,
                    breakdown: Vec::new(),
                    reason_text: String::new(),
                }
            })
            .collect();

        records.sort_by(|a, b| rank_by_magnitude((a.delta, &a.group_key), (b.delta, &b.group_key)));
        records
    }

    /// Total over every input combination; `delta_std` is the population
    /// standard deviation of all deltas in the run.
    pub fn classify(
        &self,
        before: f64,
        after: f64,
        delta: f64,
        rate: Option<f64>,
        delta_std: f64,
    ) -> Significance {
        if before == 0.0 && after != 0.0 {
            return Significance::New;
        }
        if after == 0.0 && before != 0.0 {
            return Significance::Disappeared;
        }
        let magnitude = match rate {
            Some(r) if r.is_finite() => r.abs(),
            // From `compare` a null rate past the checks above means before and
            // after are both 0, so delta is 0 and this lands in 微小. Only a
            // direct call with an inconsistent delta gets a non-zero magnitude.
            _ => {
                if delta_std > 0.0 {
                    delta.abs() / delta_std * 100.0
                } else {
                    0.0
                }
            }
        };
        Significance::from_magnitude(magnitude, &self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::AggregatedValue;

    fn aggs(entries: &[(&str, f64)]) -> Aggregates {
        entries
            .iter()
            .map(|(k, v)| {
                let key = GroupKey::from(*k);
                (
                    key.clone(),
                    AggregatedValue {
                        group_key: key,
                        value: *v,
                        rows: 1,
                    },
                )
            })
            .collect()
    }

    fn engine() -> DiffEngine {
        DiffEngine::new(SignificanceThresholds::default())
    }

    #[test]
    fn test_compare_outer_join_and_ordering() {
        let before = aggs(&[("A", 100.0), ("B", 50.0)]);
        let after = aggs(&[("A", 150.0), ("B", 50.0), ("C", 20.0)]);
        let records = engine().compare(&before, &after);

        let keys: Vec<String> = records.iter().map(|r| r.group_key.to_string()).collect();
        assert_eq!(keys, vec!["A", "C", "B"]);

        assert_eq!(records[0].delta, 50.0);
        assert_eq!(records[0].rate, Some(50.0));
        assert_eq!(records[0].significance, Significance::Large);

        assert_eq!(records[1].rate, None);
        assert_eq!(records[1].significance, Significance::New);
        assert_eq!(records[1].presence, Presence::AfterOnly);

        assert_eq!(records[2].delta, 0.0);
        assert_eq!(records[2].rate, Some(0.0));
        assert_eq!(records[2].significance, Significance::Minor);
    }

    #[test]
    fn test_disappeared_group() {
        let records = engine().compare(&aggs(&[("X", 10.0)]), &aggs(&[]));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delta, -10.0);
        assert_eq!(records[0].rate, Some(-100.0));
        assert_eq!(records[0].significance, Significance::Disappeared);
        assert_eq!(records[0].presence, Presence::BeforeOnly);
    }

    #[test]
    fn test_zero_both_sides_is_minor() {
        let records = engine().compare(&aggs(&[("Z", 0.0)]), &aggs(&[("Z", 0.0)]));
        assert_eq!(records[0].rate, None);
        assert_eq!(records[0].significance, Significance::Minor);
        assert_eq!(records[0].presence, Presence::Both);
    }

    #[test]
    fn test_rate_uses_absolute_baseline() {
        assert_eq!(rate_of(-50.0, 25.0), Some(50.0));
        assert_eq!(rate_of(0.0, 25.0), None);
    }

    #[test]
    fn test_tier_boundaries() {
        let t = SignificanceThresholds::default();
        assert_eq!(Significance::from_magnitude(100.0, &t), Significance::Extreme);
        assert_eq!(Significance::from_magnitude(99.9, &t), Significance::Large);
        assert_eq!(Significance::from_magnitude(20.0, &t), Significance::Medium);
        assert_eq!(Significance::from_magnitude(5.0, &t), Significance::Small);
        assert_eq!(Significance::from_magnitude(4.99, &t), Significance::Minor);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let engine = DiffEngine::new(SignificanceThresholds {
            extreme: 10.0,
            large: 8.0,
            medium: 4.0,
            small: 1.0,
        });
        let records = engine.compare(&aggs(&[("A", 100.0)]), &aggs(&[("A", 110.0)]));
        assert_eq!(records[0].significance, Significance::Extreme);
    }

    #[test]
    fn test_null_rate_falls_back_to_delta_spread() {
        let engine = engine();
        assert_eq!(engine.classify(0.0, 0.0, 0.0, None, 4.0), Significance::Minor);
        assert_eq!(engine.classify(0.0, 0.0, 3.0, None, 4.0), Significance::Large);
        assert_eq!(engine.classify(0.0, 0.0, 3.0, None, 0.0), Significance::Minor);
    }

    #[test]
    fn test_ties_break_by_key() {
        let before = aggs(&[("b", 0.0), ("a", 0.0), ("c", 5.0)]);
        let after = aggs(&[("b", 5.0), ("a", 5.0), ("c", 0.0)]);
        let records = engine().compare(&before, &after);
        let keys: Vec<String> = records.iter().map(|r| r.group_key.to_string()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_wire_field_names() {
        let records = engine().compare(&aggs(&[("A", 1.0)]), &aggs(&[("A", 2.0)]));
        let json = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(json["group_key"], "A");
        assert_eq!(json["期首値"], 1.0);
        assert_eq!(json["期末値"], 2.0);
        assert_eq!(json["差額"], 1.0);
        assert_eq!(json["差異率"], 100.0);
        assert_eq!(json["significance"], "極大");
        assert!(json["breakdown_data"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_zero_group_stays_minor_amid_wide_spread() {
        let before = aggs(&[("Z", 0.0), ("A", 10.0), ("B", 500.0)]);
        let after = aggs(&[("Z", 0.0), ("A", 900.0), ("B", 20.0)]);
        let records = engine().compare(&before, &after);
        let zero = records.iter().find(|r| r.group_key == GroupKey::from("Z")).unwrap();
        assert_eq!(zero.rate, None);
        assert_eq!(zero.delta, 0.0);
        assert_eq!(zero.significance, Significance::Minor);
    }
}
