//! Tabular Dataset
//!
//! Immutable, schema-checked wrapper around a polars `DataFrame`. Engine
//! components read columns through the typed accessors here rather than
//! poking at the frame directly.

use crate::error::{AnalysisError, Result};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::info;

/// Upper bound on rows accepted from a single file.
pub const MAX_ROWS: usize = 1_000_000;

/// Distinct value of a grouping column. Nulls form their own bucket, which
/// sorts after every real value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GroupKey {
    Value(String),
    Missing,
}

impl GroupKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GroupKey::Value(v) => Some(v.as_str()),
            GroupKey::Missing => None,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Value(v) => write!(f, "{}", v),
            GroupKey::Missing => write!(f, "(欠損)"),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(value: &str) -> Self {
        GroupKey::Value(value.to_string())
    }
}

impl From<Option<&str>> for GroupKey {
    fn from(cell: Option<&str>) -> Self {
        cell.map(GroupKey::from).unwrap_or(GroupKey::Missing)
    }
}

impl Serialize for GroupKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            GroupKey::Value(v) => serializer.serialize_str(v),
            GroupKey::Missing => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for GroupKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value: Option<String> = Option::deserialize(deserializer)?;
        Ok(value.map(GroupKey::Value).unwrap_or(GroupKey::Missing))
    }
}

/// Coarse column classification used for validation and detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Temporal,
    Boolean,
    Other,
}

impl ColumnKind {
    fn of(dtype: &DataType) -> Self {
        match dtype {
            DataType::String => ColumnKind::Categorical,
            dt if dt.is_categorical() => ColumnKind::Categorical,
            DataType::Date | DataType::Datetime(_, _) => ColumnKind::Temporal,
            DataType::Boolean => ColumnKind::Boolean,
            dt if dt.is_numeric() => ColumnKind::Numeric,
            _ => ColumnKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TabularDataset {
    frame: DataFrame,
    removed_duplicates: usize,
}

impl TabularDataset {
    pub fn new(frame: DataFrame) -> Self {
        Self {
            frame,
            removed_duplicates: 0,
        }
    }

    /// Load a CSV file, dropping exact duplicate rows.
    ///
    /// Rejects empty files and files above [`MAX_ROWS`].
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = LazyCsvReader::new(path)
            .with_try_parse_dates(true)
            .with_infer_schema_length(Some(1000))
            .finish()?
            .collect()?;

        if raw.height() == 0 {
            return Err(AnalysisError::EmptyDataset(format!("{} has no rows", path.display())));
        }
        if raw.height() > MAX_ROWS {
            return Err(AnalysisError::DataTooLarge(format!(
                "{} has {} rows (limit {})",
                path.display(),
                raw.height(),
                MAX_ROWS
            )));
        }

        let initial_rows = raw.height();
        let frame = raw
            .lazy()
            .unique_stable(None, UniqueKeepStrategy::First)
            .collect()?;
        let removed_duplicates = initial_rows - frame.height();

        info!(
            "Loaded {} ({} rows, {} columns, {} duplicates removed)",
            path.display(),
            frame.height(),
            frame.width(),
            removed_duplicates
        );

        Ok(Self {
            frame,
            removed_duplicates,
        })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn removed_duplicates(&self) -> usize {
        self.removed_duplicates
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.frame.column(name).is_ok()
    }

    pub fn column_kind(&self, name: &str) -> Result<ColumnKind> {
        Ok(ColumnKind::of(self.series(name)?.dtype()))
    }

    /// Columns of the given kind, in frame order.
    pub fn columns_of_kind(&self, kind: ColumnKind) -> Vec<String> {
        self.frame
            .get_columns()
            .iter()
            .filter(|s| ColumnKind::of(s.dtype()) == kind)
            .map(|s| s.name().to_string())
            .collect()
    }

    /// Grouping keys for every row. Non-string columns are rendered through a
    /// string cast so numeric and date keys compare by their printed form.
    pub fn group_keys(&self, name: &str) -> Result<Vec<GroupKey>> {
        let series = self.series(name)?;
        let as_text = series.cast(&DataType::String)?;
        let keys = as_text.str()?.into_iter().map(GroupKey::from).collect();
        Ok(keys)
    }

    /// Numeric values for every row, nulls preserved.
    pub fn numeric_values(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let series = self.series(name)?;
        if ColumnKind::of(series.dtype()) != ColumnKind::Numeric {
            return Err(AnalysisError::Type(format!(
                "column '{}' is {} and cannot be used as a numeric value",
                name,
                series.dtype()
            )));
        }
        let as_float = series.cast(&DataType::Float64)?;
        Ok(as_float.f64()?.into_iter().collect())
    }

    /// Cells of any column rendered as text, nulls preserved.
    pub fn text_values(&self, name: &str) -> Result<Vec<Option<String>>> {
        let as_text = self.series(name)?.cast(&DataType::String)?;
        Ok(as_text
            .str()?
            .into_iter()
            .map(|v| v.map(|s| s.to_string()))
            .collect())
    }

    pub fn profile(&self) -> Result<DatasetProfile> {
        let rows = self.frame.height();
        let mut missing_values = BTreeMap::new();
        let mut missing_percentage = BTreeMap::new();
        let mut unique_counts = BTreeMap::new();
        let mut data_types = BTreeMap::new();

        for series in self.frame.get_columns() {
            let name = series.name().to_string();
            let nulls = series.null_count();
            let pct = if rows == 0 { 0.0 } else { nulls as f64 / rows as f64 * 100.0 };
            missing_values.insert(name.clone(), nulls);
            missing_percentage.insert(name.clone(), pct);
            unique_counts.insert(name.clone(), series.n_unique()?);
            data_types.insert(name, series.dtype().to_string());
        }

        Ok(DatasetProfile {
            columns: self.column_names(),
            numeric_columns: self.columns_of_kind(ColumnKind::Numeric),
            categorical_columns: self.columns_of_kind(ColumnKind::Categorical),
            row_count: rows,
            missing_values,
            missing_percentage,
            unique_counts,
            data_types,
            removed_duplicates: self.removed_duplicates,
        })
    }

    fn series(&self, name: &str) -> Result<&Series> {
        self.frame
            .column(name)
            .map_err(|_| AnalysisError::Schema(format!("column '{}' not found", name)))
    }
}

impl From<DataFrame> for TabularDataset {
    fn from(frame: DataFrame) -> Self {
        TabularDataset::new(frame)
    }
}

/// Column-level description of a loaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetProfile {
    pub columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub categorical_columns: Vec<String>,
    pub row_count: usize,
    pub missing_values: BTreeMap<String, usize>,
    pub missing_percentage: BTreeMap<String, f64>,
    pub unique_counts: BTreeMap<String, usize>,
    pub data_types: BTreeMap<String, String>,
    pub removed_duplicates: usize,
}
