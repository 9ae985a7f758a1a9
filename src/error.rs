use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Data too large: {0}")]
    DataTooLarge(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Polars error: {0}")]
    Polars(String),
}

impl From<polars::error::PolarsError> for AnalysisError {
    fn from(err: polars::error::PolarsError) -> Self {
        AnalysisError::Polars(err.to_string())
    }
}

impl AnalysisError {
    /// Stable kind label surfaced to callers alongside the message.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalysisError::Schema(_) => ErrorKind::SchemaError,
            AnalysisError::Type(_) => ErrorKind::TypeError,
            AnalysisError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            AnalysisError::DataTooLarge(_) | AnalysisError::EmptyDataset(_) => ErrorKind::IntakeError,
            AnalysisError::Execution(_)
            | AnalysisError::Io(_)
            | AnalysisError::Json(_)
            | AnalysisError::Polars(_) => ErrorKind::Internal,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    SchemaError,
    TypeError,
    InvalidRequest,
    IntakeError,
    Internal,
}

/// Structured fatal error handed back instead of a partial result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Non-fatal conditions that degrade part of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    InsufficientData,
    BreakdownUnavailable,
    TrendUnavailable,
    CorrelationUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    pub fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
