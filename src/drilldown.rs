//! Breakdown Decomposition
//!
//! Splits each group's delta across the values of one or more sub-grouping
//! columns. Children partition the parent's rows, so their deltas add back up
//! to the parent delta.

use crate::aggregate::{Accumulator, AggMethod, AggregatedValue, Aggregates, Aggregator};
use crate::dataset::{GroupKey, TabularDataset};
use crate::diff::{outer_join, rank_by_magnitude, DiffRecord};
use crate::error::{Result, Warning, WarningKind};
use crate::stats::sample_variance;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownContribution {
    pub sub_key: GroupKey,
    pub before_value: f64,
    pub after_value: f64,
    pub delta: f64,
    /// Fraction of the parent delta; all zero when the parent delta is zero
    pub share_of_parent_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownStats {
    pub total_items: usize,
    pub positive_items: usize,
    pub negative_items: usize,
    pub zero_items: usize,
    pub std_dev: Option<f64>,
    pub variance: Option<f64>,
}

impl BreakdownStats {
    fn from_deltas(deltas: &[f64]) -> Self {
        let (std_dev, variance) = match sample_variance(deltas) {
            Some(var) => (Some(var.sqrt()), Some(var)),
            None => (None, None),
        };
        Self {
            total_items: deltas.len(),
            positive_items: deltas.iter().filter(|d| **d > 0.0).count(),
            negative_items: deltas.iter().filter(|d| **d < 0.0).count(),
            zero_items: deltas.iter().filter(|d| **d == 0.0).count(),
            std_dev,
            variance,
        }
    }
}

/// Contributions of one sub-grouping column to one parent record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnBreakdown {
    pub column: String,
    /// Ranked by |delta| descending, ties by sub key
    pub contributions: Vec<BreakdownContribution>,
    pub stats: BreakdownStats,
}

impl ColumnBreakdown {
    pub fn top_contributor(&self) -> Option<&BreakdownContribution> {
        self.contributions.first()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BreakdownOutcome {
    /// Indexed like the input records
    pub per_record: Vec<Vec<ColumnBreakdown>>,
    pub warnings: Vec<Warning>,
}

/// Per-parent accumulators for one side of one breakdown column.
struct NestedGroups {
    parents: HashMap<GroupKey, Accumulator>,
    children: HashMap<GroupKey, HashMap<GroupKey, Accumulator>>,
}

pub struct BreakdownDecomposer {
    aggregator: Aggregator,
}

impl BreakdownDecomposer {
    pub fn new(method: AggMethod) -> Self {
        Self {
            aggregator: Aggregator::new(method),
        }
    }

    pub fn decompose(
        &self,
        before: &TabularDataset,
        after: &TabularDataset,
        group_col: &str,
        value_col: &str,
        breakdown_cols: &[String],
        records: &[DiffRecord],
    ) -> Result<BreakdownOutcome> {
        let mut outcome = BreakdownOutcome {
            per_record: vec![Vec::new(); records.len()],
            warnings: Vec::new(),
        };

        for column in breakdown_cols {
            if !before.has_column(column) || !after.has_column(column) {
                let side = if before.has_column(column) { "after" } else { "before" };
                warn!("Breakdown column '{}' missing from {} dataset, skipping", column, side);
                outcome.warnings.push(Warning::new(
                    WarningKind::BreakdownUnavailable,
                    format!(
                        "breakdown column '{}' is missing from the {} dataset; omitted for every group",
                        column, side
                    ),
                ));
                continue;
            }

            let nested_before = self.nest(before, group_col, column, value_col)?;
            let nested_after = self.nest(after, group_col, column, value_col)?;
            debug!(
                "Breakdown '{}': {} / {} parent groups",
                column,
                nested_before.parents.len(),
                nested_after.parents.len()
            );

            for (idx, record) in records.iter().enumerate() {
                let sub_before = self.child_aggregates(&nested_before, &record.group_key);
                let sub_after = self.child_aggregates(&nested_after, &record.group_key);
                if sub_before.is_empty() && sub_after.is_empty() {
                    continue;
                }
                outcome.per_record[idx].push(Self::contributions(column, record.delta, &sub_before, &sub_after));
            }
        }

        Ok(outcome)
    }

    /// One group-by keyed by (parent, child); parent totals are the sum of
    /// their children.
    fn nest(
        &self,
        dataset: &TabularDataset,
        group_col: &str,
        sub_col: &str,
        value_col: &str,
    ) -> Result<NestedGroups> {
        let totals = self.aggregator.group_totals(dataset, &[group_col, sub_col], value_col)?;

        let mut nested = NestedGroups {
            parents: HashMap::new(),
            children: HashMap::new(),
        };
        for (keys, acc) in totals {
            let mut keys = keys.into_iter();
            let (Some(parent), Some(child)) = (keys.next(), keys.next()) else {
                continue;
            };
            nested.parents.entry(parent.clone()).or_default().merge(&acc);
            nested.children.entry(parent).or_default().insert(child, acc);
        }
        Ok(nested)
    }

    /// Sub-group values for one parent. For mean, each child contributes its
    /// share of the parent mean (`child_sum / parent_non_null`) so that the
    /// children add up to the parent value.
    fn child_aggregates(&self, nested: &NestedGroups, parent: &GroupKey) -> Aggregates {
        let Some(children) = nested.children.get(parent) else {
            return Aggregates::new();
        };
        let method = self.aggregator.method;
        let parent_non_null = nested.parents.get(parent).map(|p| p.non_null).unwrap_or(0);

        children
            .iter()
            .map(|(key, acc)| {
                let value = match method {
                    AggMethod::Mean => {
                        if parent_non_null == 0 {
                            0.0
                        } else {
                            acc.sum / parent_non_null as f64
                        }
                    }
                    _ => acc.finish(method),
                };
                let agg = AggregatedValue {
                    group_key: key.clone(),
                    value,
                    rows: acc.rows,
                };
                (key.clone(), agg)
            })
            .collect()
    }

    fn contributions(
        column: &str,
        parent_delta: f64,
        sub_before: &Aggregates,
        sub_after: &Aggregates,
    ) -> ColumnBreakdown {
        let mut contributions: Vec<BreakdownContribution> = outer_join(sub_before, sub_after)
            .into_iter()
            .map(|row| {
                let delta = row.delta();
                let share = if parent_delta != 0.0 { delta / parent_delta } else { 0.0 };
                BreakdownContribution {
                    sub_key: row.group_key,
                    before_value: row.before,
                    after_value: row.after,
                    delta,
                    share_of_parent_delta: share,
                }
            })
            .collect();
        contributions.sort_by(|a, b| rank_by_magnitude((a.delta, &a.sub_key), (b.delta, &b.sub_key)));
        reconcile(&mut contributions, parent_delta);

        let deltas: Vec<f64> = contributions.iter().map(|c| c.delta).collect();
        ColumnBreakdown {
            column: column.to_string(),
            stats: BreakdownStats::from_deltas(&deltas),
            contributions,
        }
    }
}

/// Upper bound on single-ulp steps in `reconcile`.
const MAX_NUDGES: usize = 64;

/// Adjust the top contribution so the ranked deltas, added in order, give
/// the parent delta exactly. Parent and children are summed separately, so
/// they can disagree in the last bits on fractional data.
fn reconcile(contributions: &mut [BreakdownContribution], parent_delta: f64) {
    let Some((top, rest)) = contributions.split_first_mut() else {
        return;
    };
    let ranked_sum = |head: f64| rest.iter().fold(head, |acc, c| acc + c.delta);

    let rest_sum: f64 = rest.iter().map(|c| c.delta).sum();
    let mut head = parent_delta - rest_sum;
    let total = ranked_sum(head);
    if total != parent_delta {
        head += parent_delta - total;
    }
    for _ in 0..MAX_NUDGES {
        let total = ranked_sum(head);
        if total == parent_delta {
            break;
        }
        head = next_float(head, total < parent_delta);
    }

    if head == top.delta {
        return;
    }
    top.delta = head;
    if parent_delta != 0.0 {
        top.share_of_parent_delta = head / parent_delta;
    }
}

/// Adjacent representable value above (`up`) or below `x`.
fn next_float(x: f64, up: bool) -> f64 {
    if x == 0.0 {
        let tiny = f64::from_bits(1);
        return if up { tiny } else { -tiny };
    }
    let bits = x.to_bits();
    if (x > 0.0) == up {
        f64::from_bits(bits + 1)
    } else {
        f64::from_bits(bits - 1)
    }
}
