//! Embedding extraction over a batch source.

use log::info;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis};
use std::collections::HashMap;
use std::time::Instant;

use crate::error::{EvalError, EvalResult};
use reid_vision::{BatchSource, FeatureModel, OutputFeature};

/// Tracks the most recent value and the running average.
#[derive(Debug, Clone, Default)]
pub struct AverageMeter {
    pub val: f64,
    pub avg: f64,
    pub sum: f64,
    pub count: usize,
}

impl AverageMeter {
    pub fn update(&mut self, val: f64) {
        self.val = val;
        self.sum += val;
        self.count += 1;
        self.avg = self.sum / self.count as f64;
    }
}

/// Immutable file-name → (embedding, identity) collection.
#[derive(Debug, Clone)]
pub struct Embeddings {
    index: HashMap<String, usize>,
    fnames: Vec<String>,
    features: Array2<f32>,
    labels: Vec<i64>,
}

impl Embeddings {
    pub fn len(&self) -> usize {
        self.fnames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fnames.is_empty()
    }

    /// Embedding dimensionality; 0 for an empty collection.
    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn get(&self, fname: &str) -> Option<ArrayView1<'_, f32>> {
        self.index.get(fname).map(|&i| self.features.row(i))
    }

    pub fn label(&self, fname: &str) -> Option<i64> {
        self.index.get(fname).map(|&i| self.labels[i])
    }

    /// File names in first-insertion order.
    pub fn fnames(&self) -> &[String] {
        &self.fnames
    }

    pub fn features(&self) -> ArrayView2<'_, f32> {
        self.features.view()
    }
}

/// Single-owner accumulator that finalizes into [`Embeddings`].
///
/// A repeated file name overwrites the earlier entry in place.
#[derive(Debug, Default)]
pub struct EmbeddingBuilder {
    index: HashMap<String, usize>,
    fnames: Vec<String>,
    rows: Vec<Array1<f32>>,
    labels: Vec<i64>,
    dim: Option<usize>,
}

impl EmbeddingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fname: &str, feature: ArrayView1<'_, f32>, label: i64) -> EvalResult<()> {
        match self.dim {
            Some(dim) if dim != feature.len() => {
                return Err(EvalError::shape_mismatch(
                    "embedding dimensionality",
                    &[dim],
                    &[feature.len()],
                ));
            }
            Some(_) => {}
            None => self.dim = Some(feature.len()),
        }

        match self.index.get(fname) {
            Some(&i) => {
                self.rows[i] = feature.to_owned();
                self.labels[i] = label;
            }
            None => {
                self.index.insert(fname.to_string(), self.rows.len());
                self.fnames.push(fname.to_string());
                self.rows.push(feature.to_owned());
                self.labels.push(label);
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Embeddings {
        let dim = self.dim.unwrap_or(0);
        let mut features = Array2::<f32>::zeros((self.rows.len(), dim));
        for (mut dst, src) in features.axis_iter_mut(Axis(0)).zip(&self.rows) {
            dst.assign(src);
        }
        Embeddings {
            index: self.index,
            fnames: self.fnames,
            features,
            labels: self.labels,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Log progress every this many batches.
    pub print_freq: usize,
    /// L2-normalize each embedding.
    pub normalize: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            print_freq: 100,
            normalize: false,
        }
    }
}

/// Flatten a raw model output to `(batch, dim)` according to the declared mode.
pub fn flatten_output(
    output: ArrayD<f32>,
    mode: OutputFeature,
    batch: usize,
) -> EvalResult<Array2<f32>> {
    let shape = output.shape().to_vec();
    let rank_ok = match mode {
        OutputFeature::Fc => shape.len() == 2,
        OutputFeature::Pool5 => shape.len() == 2 || shape.len() == 4,
    };
    if !rank_ok || shape.first() != Some(&batch) {
        let expected = match mode {
            OutputFeature::Fc => vec![batch, 0],
            OutputFeature::Pool5 => vec![batch, 0, 1, 1],
        };
        return Err(EvalError::shape_mismatch("model output", &expected, &shape));
    }

    let dim: usize = shape[1..].iter().product();
    output
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((batch, dim))
        .map_err(|_| EvalError::shape_mismatch("model output", &[batch, dim], &shape))
}

fn l2_normalize(features: &mut Array2<f32>) {
    for mut row in features.axis_iter_mut(Axis(0)) {
        let norm = row.dot(&row).sqrt();
        if norm > 0.0 {
            row.mapv_inplace(|x| x / norm);
        }
    }
}

/// Run `model` over every batch of `source` and collect embeddings by file name.
pub fn extract_embeddings<M, S>(
    model: &mut M,
    source: &S,
    opts: &ExtractOptions,
) -> EvalResult<Embeddings>
where
    M: FeatureModel + ?Sized,
    S: BatchSource + ?Sized,
{
    model.eval_mode();
    let mode = model.output_feature();
    let total = source.num_batches();

    let mut batch_time = AverageMeter::default();
    let mut data_time = AverageMeter::default();
    let mut builder = EmbeddingBuilder::new();

    let mut end = Instant::now();
    for (i, batch) in source.batches().enumerate() {
        let batch = batch.map_err(EvalError::Loader)?;
        data_time.update(end.elapsed().as_secs_f64());
        if batch.pids.len() != batch.len() {
            return Err(EvalError::shape_mismatch(
                "batch identities",
                &[batch.len()],
                &[batch.pids.len()],
            ));
        }

        let output = model
            .forward(batch.images.view())
            .map_err(EvalError::Model)?;
        let mut features = flatten_output(output, mode, batch.len())?;
        if opts.normalize {
            l2_normalize(&mut features);
        }

        for ((fname, pid), row) in batch
            .fnames
            .iter()
            .zip(&batch.pids)
            .zip(features.axis_iter(Axis(0)))
        {
            builder.insert(fname, row, *pid)?;
        }

        batch_time.update(end.elapsed().as_secs_f64());
        end = Instant::now();

        if opts.print_freq > 0 && (i + 1) % opts.print_freq == 0 {
            info!(
                "Extract Features: [{}/{}]\tTime {:.3} ({:.3})\tData {:.3} ({:.3})",
                i + 1,
                total,
                batch_time.val,
                batch_time.avg,
                data_time.val,
                data_time.avg
            );
        }
    }

    Ok(builder.finish())
}
