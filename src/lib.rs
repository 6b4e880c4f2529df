pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod distance;
pub mod error;
pub mod evaluator;
pub mod extract;
pub mod ranking;

pub use error::{EvalError, EvalResult};
pub use evaluator::{Evaluator, LogSink, MemorySink, ReportSink, ScoreReport};
pub use ranking::{MatchMetadata, MatchRule};

// Re-export vision types for convenience
pub use reid_vision::{loader, model, transform, Batch, BatchSource, FeatureModel, Sample};
