use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EvalError, EvalResult};
use crate::ranking::MatchRule;
use reid_vision::OutputFeature;

pub static CONFIG_PATH: Lazy<&'static Path> =
    Lazy::new(|| Path::new(option_env!("REID_CONFIG_PATH").unwrap_or("reid.toml")));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Input height fed to the network.
    pub height: u32,
    pub width: u32,
    pub batch_size: usize,
    /// Log extraction progress every this many batches.
    pub print_freq: usize,
    pub output_feature: OutputFeature,
    /// L2-normalize embeddings before measuring distances.
    pub normalize: bool,
    /// Ranks reported in the summary line.
    pub cmc_topk: Vec<usize>,
    /// Length of the computed CMC curve.
    pub topk: usize,
    /// Fraction of the query split to evaluate on.
    pub query_fraction: f32,
    /// Seed for query subsampling.
    pub seed: u64,
    pub rule: MatchRule,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            height: 384,
            width: 128,
            batch_size: 64,
            print_freq: 100,
            output_feature: OutputFeature::Fc,
            normalize: false,
            cmc_topk: vec![1, 5, 10],
            topk: 100,
            query_fraction: 1.0,
            seed: 1,
            rule: MatchRule::market1501(),
        }
    }
}

impl EvalConfig {
    pub fn validate(&self) -> EvalResult<()> {
        if self.batch_size == 0 {
            return Err(EvalError::invalid_config("batch_size must be positive"));
        }
        if self.height == 0 || self.width == 0 {
            return Err(EvalError::invalid_config("input size must be positive"));
        }
        if !(self.query_fraction > 0.0 && self.query_fraction <= 1.0) {
            return Err(EvalError::invalid_config(format!(
                "query_fraction {} outside (0, 1]",
                self.query_fraction
            )));
        }
        if let Some(&rank) = self.cmc_topk.iter().find(|&&r| r == 0 || r > self.topk) {
            return Err(EvalError::invalid_config(format!(
                "cmc rank {} outside 1..={}",
                rank, self.topk
            )));
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<EvalConfig> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(EvalConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: EvalConfig =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validating config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &EvalConfig, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
