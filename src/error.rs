//! Error taxonomy for the evaluation core.
//!
//! Nothing here is retried: every variant is either a caller contract
//! violation or a failure reported by the model/loader collaborators.

use thiserror::Error;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Debug, Error)]
pub enum EvalError {
    /// A sample list names a file the embedding collection never saw.
    #[error("no embedding for '{fname}'")]
    Lookup { fname: String },

    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// NaN or infinite distance, usually from a corrupted embedding.
    #[error("non-finite distance {value} between query {query} and gallery {gallery}")]
    NonFiniteDistance {
        query: usize,
        gallery: usize,
        value: f32,
    },

    /// Neither sample lists nor explicit identity/camera arrays were given.
    #[error("identity and camera metadata are required for ranking")]
    MissingMetadata,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("model forward failed: {0:#}")]
    Model(#[source] anyhow::Error),

    #[error("data loader failed: {0:#}")]
    Loader(#[source] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    pub fn shape_mismatch(context: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        EvalError::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        EvalError::InvalidConfig(msg.into())
    }
}
