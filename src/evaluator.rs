//! Query/gallery evaluation: extract, measure, rank, report.

use log::info;
use ndarray::ArrayView2;
use serde::Serialize;

use crate::config::EvalConfig;
use crate::distance::pairwise_distance;
use crate::error::{EvalError, EvalResult};
use crate::extract::{extract_embeddings, ExtractOptions};
use crate::ranking::{cmc, mean_ap, CmcCurve, MatchMetadata, MatchRule};
use reid_vision::{BatchSource, FeatureModel, Sample};

/// mAP plus CMC at the requested ranks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreReport {
    pub map: f32,
    /// `(rank, score)` in the order requested.
    pub cmc: Vec<(usize, f32)>,
    /// Rank-1 CMC score, kept whether or not rank 1 is among the requested ranks.
    pub top1: f32,
    /// Queries scored by the CMC curve.
    pub num_valid_queries: usize,
    /// Queries scored by mAP.
    pub map_valid_queries: usize,
}

impl ScoreReport {
    pub fn cmc_at(&self, rank: usize) -> Option<f32> {
        self.cmc.iter().find(|(r, _)| *r == rank).map(|(_, s)| *s)
    }

    /// `[mAP: 50.00%], [cmc1: 0.00%], ...`
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("[mAP: {:.2}%]", self.map * 100.0)];
        parts.extend(
            self.cmc
                .iter()
                .map(|(rank, score)| format!("[cmc{}: {:.2}%]", rank, score * 100.0)),
        );
        parts.join(", ")
    }
}

/// Where evaluation summaries go.
pub trait ReportSink {
    fn report(&mut self, report: &ScoreReport);
}

/// Writes the summary line through `log`.
#[derive(Debug, Default)]
pub struct LogSink;

impl ReportSink for LogSink {
    fn report(&mut self, report: &ScoreReport) {
        info!("{}", report.summary());
    }
}

/// Keeps summary lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub lines: Vec<String>,
}

impl ReportSink for MemorySink {
    fn report(&mut self, report: &ScoreReport) {
        self.lines.push(report.summary());
    }
}

/// Score a distance matrix: mAP and CMC under `rule`, sampled at `cmc_ranks`.
pub fn evaluate_all(
    distmat: ArrayView2<'_, f32>,
    meta: &MatchMetadata,
    rule: &MatchRule,
    topk: usize,
    cmc_ranks: &[usize],
) -> EvalResult<ScoreReport> {
    if let Some(&bad) = cmc_ranks.iter().find(|&&r| r == 0 || r > topk) {
        return Err(EvalError::invalid_config(format!(
            "cmc rank {} outside 1..={}",
            bad, topk
        )));
    }

    let map = mean_ap(distmat, meta, rule.junk_identity)?;
    let curve: CmcCurve = cmc(distmat, meta, rule, topk)?;

    Ok(ScoreReport {
        map: map.value,
        cmc: cmc_ranks
            .iter()
            .map(|&r| (r, curve.at(r).unwrap_or(0.0)))
            .collect(),
        top1: curve.at(1).unwrap_or(0.0),
        num_valid_queries: curve.num_valid_queries,
        map_valid_queries: map.num_valid_queries,
    })
}

pub struct Evaluator<M> {
    model: M,
    config: EvalConfig,
}

impl<M: FeatureModel> Evaluator<M> {
    pub fn new(model: M, config: EvalConfig) -> Self {
        Self { model, config }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Full evaluation; returns the rank-1 CMC score used for model selection.
    pub fn evaluate<Q, G>(
        &mut self,
        query_loader: &Q,
        gallery_loader: &G,
        query: &[Sample],
        gallery: &[Sample],
        sink: &mut dyn ReportSink,
    ) -> EvalResult<f32>
    where
        Q: BatchSource + ?Sized,
        G: BatchSource + ?Sized,
    {
        let report = self.evaluate_report(query_loader, gallery_loader, query, gallery)?;
        sink.report(&report);
        Ok(report.top1)
    }

    /// Same as [`Evaluator::evaluate`] but hands back the whole report.
    pub fn evaluate_report<Q, G>(
        &mut self,
        query_loader: &Q,
        gallery_loader: &G,
        query: &[Sample],
        gallery: &[Sample],
    ) -> EvalResult<ScoreReport>
    where
        Q: BatchSource + ?Sized,
        G: BatchSource + ?Sized,
    {
        self.config.validate()?;
        let opts = ExtractOptions {
            print_freq: self.config.print_freq,
            normalize: self.config.normalize,
        };

        info!("extracting query features");
        let query_features = extract_embeddings(&mut self.model, query_loader, &opts)?;
        info!("extracting gallery features");
        let gallery_features = extract_embeddings(&mut self.model, gallery_loader, &opts)?;

        let distmat = pairwise_distance(&query_features, &gallery_features, query, gallery)?;
        let meta = MatchMetadata::from_samples(query, gallery);
        evaluate_all(
            distmat.view(),
            &meta,
            &self.config.rule,
            self.config.topk,
            &self.config.cmc_topk,
        )
    }
}
