//! Group Aggregation
//!
//! Reduces a value column to one scalar per distinct grouping key with a
//! single polars group-by.

use crate::dataset::{ColumnKind, GroupKey, TabularDataset};
use crate::error::{AnalysisError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggMethod {
    Sum,
    Mean,
    Count,
}

impl AggMethod {
    pub fn requires_numeric(&self) -> bool {
        !matches!(self, AggMethod::Count)
    }
}

impl fmt::Display for AggMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggMethod::Sum => "sum",
            AggMethod::Mean => "mean",
            AggMethod::Count => "count",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for AggMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(AggMethod::Sum),
            "mean" => Ok(AggMethod::Mean),
            "count" => Ok(AggMethod::Count),
            other => Err(AnalysisError::InvalidRequest(format!(
                "unknown aggregation method '{}'",
                other
            ))),
        }
    }
}

const ROWS: &str = "__rows";
const NON_NULL: &str = "__non_null";
const SUM: &str = "__sum";
const VALUE: &str = "__value";

/// Totals for one group.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    pub rows: usize,
    pub non_null: usize,
    pub sum: f64,
}

impl Accumulator {
    pub fn merge(&mut self, other: &Accumulator) {
        self.rows += other.rows;
        self.non_null += other.non_null;
        self.sum += other.sum;
    }

    /// Final scalar for the method. A mean over no values is 0.
    pub fn finish(&self, method: AggMethod) -> f64 {
        match method {
            AggMethod::Sum => self.sum,
            AggMethod::Count => self.rows as f64,
            AggMethod::Mean => {
                if self.non_null == 0 {
                    0.0
                } else {
                    self.sum / self.non_null as f64
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedValue {
    pub group_key: GroupKey,
    pub value: f64,
    /// Rows that fell into the group, nulls included
    pub rows: usize,
}

pub type Aggregates = HashMap<GroupKey, AggregatedValue>;

/// One group of a (possibly composite) key with its totals.
pub type GroupTotals = (Vec<GroupKey>, Accumulator);

pub struct Aggregator {
    pub method: AggMethod,
}

impl Aggregator {
    pub fn new(method: AggMethod) -> Self {
        Self { method }
    }

    /// Aggregate `value_col` by `group_col`.
    ///
    /// Fails with a schema error when either column is absent and with a type
    /// error when the value column is not numeric for sum/mean.
    pub fn aggregate(
        &self,
        dataset: &TabularDataset,
        group_col: &str,
        value_col: &str,
    ) -> Result<Aggregates> {
        let groups = self.group_totals(dataset, &[group_col], value_col)?;
        Ok(groups
            .into_iter()
            .filter_map(|(keys, acc)| {
                let key = keys.into_iter().next()?;
                let value = AggregatedValue {
                    group_key: key.clone(),
                    value: acc.finish(self.method),
                    rows: acc.rows,
                };
                Some((key, value))
            })
            .collect())
    }

    /// Row count, non-null count and sum of `value_col` per distinct
    /// combination of `key_cols`, in a single polars group-by. Keys are
    /// compared by their string form; null keys form their own group.
    pub fn group_totals(
        &self,
        dataset: &TabularDataset,
        key_cols: &[&str],
        value_col: &str,
    ) -> Result<Vec<GroupTotals>> {
        for key in key_cols {
            dataset.column_kind(key)?;
        }
        let value = self.value_expr(dataset, value_col)?;

        let key_names: Vec<String> = (0..key_cols.len()).map(|i| format!("__key{}", i)).collect();
        let mut selection: Vec<Expr> = key_cols
            .iter()
            .zip(&key_names)
            .map(|(c, name)| col(c).cast(DataType::String).alias(name))
            .collect();
        selection.push(value.alias(VALUE));

        let grouped = dataset
            .frame()
            .clone()
            .lazy()
            .select(selection)
            .group_by_stable(key_names.iter().map(|n| col(n)).collect::<Vec<_>>())
            .agg([
                len().cast(DataType::UInt64).alias(ROWS),
                col(VALUE).is_not_null().sum().cast(DataType::UInt64).alias(NON_NULL),
                col(VALUE).sum().alias(SUM),
            ])
            .collect()?;

        let key_columns = key_names
            .iter()
            .map(|name| -> Result<Vec<GroupKey>> {
                Ok(grouped.column(name)?.str()?.into_iter().map(GroupKey::from).collect())
            })
            .collect::<Result<Vec<_>>>()?;
        let rows = grouped.column(ROWS)?.u64()?;
        let non_null = grouped.column(NON_NULL)?.u64()?;
        let sums = grouped.column(SUM)?.f64()?;

        let totals = (0..grouped.height())
            .map(|i| {
                let keys = key_columns.iter().map(|c| c[i].clone()).collect();
                let acc = Accumulator {
                    rows: rows.get(i).unwrap_or(0) as usize,
                    non_null: non_null.get(i).unwrap_or(0) as usize,
                    sum: sums.get(i).unwrap_or(0.0),
                };
                (keys, acc)
            })
            .collect();
        Ok(totals)
    }

    /// The value column as the method sees it. Count only needs the rows, so
    /// a non-numeric column contributes nulls.
    fn value_expr(&self, dataset: &TabularDataset, value_col: &str) -> Result<Expr> {
        match dataset.column_kind(value_col)? {
            ColumnKind::Numeric => Ok(col(value_col).cast(DataType::Float64)),
            kind if self.method.requires_numeric() => Err(AnalysisError::Type(format!(
                "column '{}' is {:?} and cannot be aggregated with {}",
                value_col, kind, self.method
            ))),
            _ => Ok(lit(NULL).cast(DataType::Float64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;

    fn dataset() -> TabularDataset {
        let df = df! [
            "dept" => [Some("A"), Some("A"), Some("B"), None, Some("B")],
            "sales" => [Some(100.0), Some(50.0), None, Some(7.0), Some(30.0)],
            "label" => ["x", "y", "z", "w", "v"]
        ]
        .unwrap();
        TabularDataset::new(df)
    }

    #[test]
    fn test_sum_skips_nulls() {
        let aggs = Aggregator::new(AggMethod::Sum).aggregate(&dataset(), "dept", "sales").unwrap();
        assert_eq!(aggs.len(), 3);
        assert_eq!(aggs[&GroupKey::from("A")].value, 150.0);
        assert_eq!(aggs[&GroupKey::from("B")].value, 30.0);
        assert_eq!(aggs[&GroupKey::Missing].value, 7.0);
    }

    #[test]
    fn test_mean_uses_non_null_values() {
        let aggs = Aggregator::new(AggMethod::Mean).aggregate(&dataset(), "dept", "sales").unwrap();
        assert_eq!(aggs[&GroupKey::from("A")].value, 75.0);
        assert_eq!(aggs[&GroupKey::from("B")].value, 30.0);
        assert_eq!(aggs[&GroupKey::from("B")].rows, 2);
    }

    #[test]
    fn test_count_includes_null_values() {
        let aggs = Aggregator::new(AggMethod::Count).aggregate(&dataset(), "dept", "sales").unwrap();
        assert_eq!(aggs[&GroupKey::from("B")].value, 2.0);
    }

    #[test]
    fn test_count_accepts_text_value_column() {
        let aggs = Aggregator::new(AggMethod::Count).aggregate(&dataset(), "dept", "label").unwrap();
        assert_eq!(aggs[&GroupKey::from("A")].value, 2.0);
        assert_eq!(aggs[&GroupKey::Missing].value, 1.0);
    }

    #[test]
    fn test_sum_rejects_text_value_column() {
        let err = Aggregator::new(AggMethod::Sum).aggregate(&dataset(), "dept", "label").unwrap_err();
        assert!(matches!(err, AnalysisError::Type(_)));
    }

    #[test]
    fn test_missing_columns_are_schema_errors() {
        let agg = Aggregator::new(AggMethod::Sum);
        assert!(matches!(agg.aggregate(&dataset(), "region", "sales"), Err(AnalysisError::Schema(_))));
        assert!(matches!(agg.aggregate(&dataset(), "dept", "profit"), Err(AnalysisError::Schema(_))));
    }

    #[test]
    fn test_mean_of_all_null_group_is_zero() {
        let df = df! [
            "dept" => ["A", "A", "B"],
            "sales" => [None, None, Some(4.0)]
        ]
        .unwrap();
        let dataset = TabularDataset::new(df);
        let mean = Aggregator::new(AggMethod::Mean).aggregate(&dataset, "dept", "sales").unwrap();
        assert_eq!(mean[&GroupKey::from("A")].value, 0.0);
        assert_eq!(mean[&GroupKey::from("B")].value, 4.0);
        let count = Aggregator::new(AggMethod::Count).aggregate(&dataset, "dept", "sales").unwrap();
        assert_eq!(count[&GroupKey::from("A")].value, 2.0);
    }

    #[test]
    fn test_composite_key_totals() {
        let totals = Aggregator::new(AggMethod::Sum)
            .group_totals(&dataset(), &["dept", "label"], "sales")
            .unwrap();
        assert_eq!(totals.len(), 5);
        let (_, acc) = totals
            .iter()
            .find(|(keys, _)| keys == &vec![GroupKey::from("B"), GroupKey::from("z")])
            .unwrap();
        assert_eq!((acc.rows, acc.non_null, acc.sum), (1, 0, 0.0));
    }

    #[test]
    fn test_numeric_group_column_keys_by_text() {
        let df = df! [
            "year" => [2023i64, 2023, 2024],
            "sales" => [1.0, 2.0, 5.0]
        ]
        .unwrap();
        let aggs = Aggregator::new(AggMethod::Sum)
            .aggregate(&TabularDataset::new(df), "year", "sales")
            .unwrap();
        assert_eq!(aggs[&GroupKey::from("2023")].value, 3.0);
        assert_eq!(aggs[&GroupKey::from("2024")].rows, 1);
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("SUM".parse::<AggMethod>().unwrap(), AggMethod::Sum);
        assert!("median".parse::<AggMethod>().is_err());
    }
}
