use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::EvalResult;

/// Best-model bookkeeping that sits next to the saved weights.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub best_top1: f32,
    /// Weights file of the best model so far.
    pub model: Option<PathBuf>,
}

impl CheckpointMeta {
    /// Missing file means no evaluation has been recorded yet.
    pub fn load(path: &Path) -> EvalResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, path: &Path) -> EvalResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    /// Record the validation score of `epoch`; true when it ties or beats the best.
    pub fn record(&mut self, epoch: usize, top1: f32, model: Option<&Path>) -> bool {
        self.epoch = epoch;
        let is_best = top1 >= self.best_top1;
        if is_best {
            self.best_top1 = top1;
            if let Some(model) = model {
                self.model = Some(model.to_path_buf());
            }
        }
        is_best
    }
}
