pub mod aggregate;
pub mod analysis;
pub mod charts;
pub mod config;
pub mod dataset;
pub mod diff;
pub mod drilldown;
pub mod error;
pub mod narrative;
pub mod parallel;
pub mod stats;

pub use aggregate::{AggMethod, Aggregator};
pub use analysis::{AdvancedOptions, AnalysisOrchestrator, AnalysisRequest, AnalysisResult, AnalysisSummary};
pub use config::EngineConfig;
pub use dataset::{GroupKey, TabularDataset};
pub use diff::{DiffEngine, DiffRecord, Significance};
pub use error::{AnalysisError, Result};
