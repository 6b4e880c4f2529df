use ndarray::Array4;
use serde::{Deserialize, Serialize};

/// One labelled image of a dataset split.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sample {
    pub fname: String,
    /// Identity label. Negative values mark junk/distractor images.
    pub pid: i64,
    /// Zero-based camera index.
    pub cam: u32,
}

impl Sample {
    pub fn new(fname: impl Into<String>, pid: i64, cam: u32) -> Self {
        Self {
            fname: fname.into(),
            pid,
            cam,
        }
    }
}

/// A batch as yielded by a [`BatchSource`](crate::loader::BatchSource).
#[derive(Debug, Clone)]
pub struct Batch {
    /// `(batch, 3, height, width)`
    pub images: Array4<f32>,
    pub fnames: Vec<String>,
    pub pids: Vec<i64>,
    pub cams: Vec<u32>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.fnames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fnames.is_empty()
    }
}
