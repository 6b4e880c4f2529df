//! Ranking metrics: mean average precision and CMC curves.
//!
//! For every query row the gallery columns are ranked by ascending distance
//! (stable, so ties keep gallery order). A gallery entry sharing both the
//! identity and the camera of the query is never scored, and neither is an
//! entry carrying the junk identity. Queries left without a single true match
//! are skipped: they count towards neither metric's denominator.

use log::warn;
use ndarray::{ArrayView1, ArrayView2};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{EvalError, EvalResult};
use reid_vision::Sample;

/// Named CMC matching policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchRule {
    /// Drop every gallery entry taken by the query's camera.
    pub separate_camera_set: bool,
    /// Score one randomly drawn entry per gallery identity, averaged over
    /// `repeats` draws.
    pub single_gallery_shot: bool,
    /// Credit only the first true match of each ranked list.
    pub first_match_break: bool,
    pub repeats: usize,
    /// Seed for the single-gallery-shot draws.
    pub seed: u64,
    pub junk_identity: Option<i64>,
}

impl MatchRule {
    pub fn market1501() -> Self {
        Self {
            separate_camera_set: false,
            single_gallery_shot: false,
            first_match_break: true,
            repeats: 10,
            seed: 0,
            junk_identity: Some(-1),
        }
    }

    pub fn cuhk03() -> Self {
        Self {
            separate_camera_set: true,
            single_gallery_shot: true,
            first_match_break: false,
            ..Self::market1501()
        }
    }

    pub fn allshots() -> Self {
        Self {
            first_match_break: false,
            ..Self::market1501()
        }
    }

    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "market1501" => Some(Self::market1501()),
            "cuhk03" => Some(Self::cuhk03()),
            "allshots" => Some(Self::allshots()),
            _ => None,
        }
    }
}

impl Default for MatchRule {
    fn default() -> Self {
        Self::market1501()
    }
}

/// Identity and camera of every distance-matrix row (query) and column (gallery).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchMetadata {
    pub query_ids: Vec<i64>,
    pub gallery_ids: Vec<i64>,
    pub query_cams: Vec<u32>,
    pub gallery_cams: Vec<u32>,
}

impl MatchMetadata {
    pub fn from_samples(query: &[Sample], gallery: &[Sample]) -> Self {
        Self {
            query_ids: query.iter().map(|s| s.pid).collect(),
            gallery_ids: gallery.iter().map(|s| s.pid).collect(),
            query_cams: query.iter().map(|s| s.cam).collect(),
            gallery_cams: gallery.iter().map(|s| s.cam).collect(),
        }
    }

    /// Prefer the sample lists; fall back to explicit arrays.
    pub fn resolve(
        query: Option<&[Sample]>,
        gallery: Option<&[Sample]>,
        explicit: Option<MatchMetadata>,
    ) -> EvalResult<Self> {
        match (query, gallery, explicit) {
            (Some(q), Some(g), _) => Ok(Self::from_samples(q, g)),
            (_, _, Some(meta)) => Ok(meta),
            _ => Err(EvalError::MissingMetadata),
        }
    }

    pub fn num_query(&self) -> usize {
        self.query_ids.len()
    }

    pub fn num_gallery(&self) -> usize {
        self.gallery_ids.len()
    }

    fn check(&self, distmat: &ArrayView2<'_, f32>) -> EvalResult<()> {
        if self.query_cams.len() != self.query_ids.len() {
            return Err(EvalError::shape_mismatch(
                "query cameras",
                &[self.query_ids.len()],
                &[self.query_cams.len()],
            ));
        }
        if self.gallery_cams.len() != self.gallery_ids.len() {
            return Err(EvalError::shape_mismatch(
                "gallery cameras",
                &[self.gallery_ids.len()],
                &[self.gallery_cams.len()],
            ));
        }
        let expected = [self.num_query(), self.num_gallery()];
        if distmat.shape() != expected {
            return Err(EvalError::shape_mismatch(
                "distance matrix",
                &expected,
                distmat.shape(),
            ));
        }
        if let Some(((query, gallery), &value)) =
            distmat.indexed_iter().find(|(_, d)| !d.is_finite())
        {
            return Err(EvalError::NonFiniteDistance {
                query,
                gallery,
                value,
            });
        }
        Ok(())
    }
}

/// Gallery columns by ascending distance. Negative values from the norm
/// expansion are clamped to zero; ties keep column order. Callers reject
/// non-finite rows first, `mean_ap` and `cmc` do so through the metadata check.
pub fn ranked_order(row: ArrayView1<'_, f32>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| {
        row[a]
            .max(0.0)
            .partial_cmp(&row[b].max(0.0))
            .unwrap_or(Ordering::Equal)
    });
    order
}

/// Per-position flags of one query's ranked gallery list.
struct RankedQuery {
    order: Vec<usize>,
    valid: Vec<bool>,
    matches: Vec<bool>,
}

impl RankedQuery {
    fn new(
        row: ArrayView1<'_, f32>,
        meta: &MatchMetadata,
        i: usize,
        junk: Option<i64>,
        separate_camera_set: bool,
    ) -> Self {
        let (qid, qcam) = (meta.query_ids[i], meta.query_cams[i]);
        let order = ranked_order(row);
        let mut valid = Vec::with_capacity(order.len());
        let mut matches = Vec::with_capacity(order.len());
        for &j in &order {
            let (gid, gcam) = (meta.gallery_ids[j], meta.gallery_cams[j]);
            let same_view = gid == qid && gcam == qcam;
            let is_junk = junk == Some(gid);
            let same_cam = separate_camera_set && gcam == qcam;
            valid.push(!(same_view || is_junk || same_cam));
            matches.push(gid == qid);
        }
        Self {
            order,
            valid,
            matches,
        }
    }

    fn has_valid_match(&self) -> bool {
        self.valid.iter().zip(&self.matches).any(|(&v, &m)| v && m)
    }

    /// Positions of true matches among the entries kept by `mask`.
    fn hit_positions(&self, mask: &[bool]) -> Vec<usize> {
        mask.iter()
            .zip(&self.matches)
            .filter_map(|(&kept, &m)| kept.then_some(m))
            .enumerate()
            .filter_map(|(k, m)| m.then_some(k))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeanAp {
    pub value: f32,
    pub num_valid_queries: usize,
}

/// Mean over scored queries of the average precision of their ranked list.
pub fn mean_ap(
    distmat: ArrayView2<'_, f32>,
    meta: &MatchMetadata,
    junk_identity: Option<i64>,
) -> EvalResult<MeanAp> {
    meta.check(&distmat)?;

    let mut aps = Vec::new();
    for (i, row) in distmat.outer_iter().enumerate() {
        let q = RankedQuery::new(row, meta, i, junk_identity, false);
        let mut rank = 0usize;
        let mut hits = 0usize;
        let mut precision_sum = 0.0f64;
        for (&v, &m) in q.valid.iter().zip(&q.matches) {
            if !v {
                continue;
            }
            rank += 1;
            if m {
                hits += 1;
                precision_sum += hits as f64 / rank as f64;
            }
        }
        if hits > 0 {
            aps.push(precision_sum / hits as f64);
        }
    }

    if aps.is_empty() {
        warn!("mAP: no query has a valid gallery match");
        return Ok(MeanAp {
            value: 0.0,
            num_valid_queries: 0,
        });
    }
    Ok(MeanAp {
        value: (aps.iter().sum::<f64>() / aps.len() as f64) as f32,
        num_valid_queries: aps.len(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CmcCurve {
    /// `scores[k]` is the match rate within the top `k + 1`.
    pub scores: Vec<f32>,
    pub num_valid_queries: usize,
}

impl CmcCurve {
    /// One-based rank lookup.
    pub fn at(&self, rank: usize) -> Option<f32> {
        rank.checked_sub(1).and_then(|k| self.scores.get(k).copied())
    }
}

/// Cumulative match characteristic up to `topk` under `rule`.
pub fn cmc(
    distmat: ArrayView2<'_, f32>,
    meta: &MatchMetadata,
    rule: &MatchRule,
    topk: usize,
) -> EvalResult<CmcCurve> {
    meta.check(&distmat)?;
    if topk == 0 {
        return Err(EvalError::invalid_config("cmc topk must be positive"));
    }

    let mut rng = StdRng::seed_from_u64(rule.seed);
    let mut ret = vec![0.0f64; topk];
    let mut num_valid = 0usize;

    for (i, row) in distmat.outer_iter().enumerate() {
        let q = RankedQuery::new(
            row,
            meta,
            i,
            rule.junk_identity,
            rule.separate_camera_set,
        );
        if !q.has_valid_match() {
            continue;
        }

        let (repeats, groups) = if rule.single_gallery_shot {
            let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
            for (pos, &j) in q.order.iter().enumerate() {
                if q.valid[pos] {
                    groups.entry(meta.gallery_ids[j]).or_default().push(pos);
                }
            }
            (rule.repeats.max(1), groups)
        } else {
            (1, BTreeMap::new())
        };

        for _ in 0..repeats {
            let hits = if rule.single_gallery_shot {
                let mut sampled = vec![false; q.valid.len()];
                for positions in groups.values() {
                    if let Some(&pos) = positions.choose(&mut rng) {
                        sampled[pos] = true;
                    }
                }
                q.hit_positions(&sampled)
            } else {
                q.hit_positions(&q.valid)
            };
            if hits.is_empty() {
                continue;
            }

            let delta = 1.0 / (hits.len() * repeats) as f64;
            for (j, &k) in hits.iter().enumerate() {
                // k - j: non-matching entries ranked ahead of this match
                if k - j >= topk {
                    break;
                }
                if rule.first_match_break {
                    ret[k - j] += 1.0 / repeats as f64;
                    break;
                }
                ret[k - j] += delta;
            }
        }
        num_valid += 1;
    }

    if num_valid == 0 {
        warn!("CMC: no query has a valid gallery match");
        return Ok(CmcCurve {
            scores: vec![0.0; topk],
            num_valid_queries: 0,
        });
    }

    let mut acc = 0.0f64;
    let scores = ret
        .iter()
        .map(|v| {
            acc += v;
            (acc / num_valid as f64) as f32
        })
        .collect();
    Ok(CmcCurve {
        scores,
        num_valid_queries: num_valid,
    })
}
