use anyhow::{Context, Result};
use ndarray::{Array4, Axis};
use std::path::PathBuf;

use crate::sample::{Batch, Sample};
use crate::transform::Transform;

/// A finite source of batches that can be iterated again from the start.
pub trait BatchSource {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_>;

    fn num_batches(&self) -> usize;
}

/// Pre-built batches, mostly useful for tests and cached features.
impl BatchSource for Vec<Batch> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }

    fn num_batches(&self) -> usize {
        self.len()
    }
}

/// Loads the images of a sample list from `root` in list order.
pub struct ImageLoader {
    root: PathBuf,
    samples: Vec<Sample>,
    batch_size: usize,
    transform: Transform,
}

impl ImageLoader {
    pub fn new(
        root: impl Into<PathBuf>,
        samples: Vec<Sample>,
        batch_size: usize,
        transform: Transform,
    ) -> Result<Self> {
        if batch_size == 0 {
            anyhow::bail!("batch size must be positive");
        }
        Ok(Self {
            root: root.into(),
            samples,
            batch_size,
            transform,
        })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    fn load_batch(&self, chunk: &[Sample]) -> Result<Batch> {
        let (h, w) = (
            self.transform.height as usize,
            self.transform.width as usize,
        );
        let mut images = Array4::<f32>::zeros((chunk.len(), 3, h, w));

        for (sample, slot) in chunk.iter().zip(images.axis_iter_mut(Axis(0))) {
            let path = self.root.join(&sample.fname);
            let img = image::open(&path).with_context(|| format!("reading {}", path.display()))?;
            self.transform
                .apply_into(&img, slot)
                .with_context(|| format!("transforming {}", path.display()))?;
        }

        Ok(Batch {
            images,
            fnames: chunk.iter().map(|s| s.fname.clone()).collect(),
            pids: chunk.iter().map(|s| s.pid).collect(),
            cams: chunk.iter().map(|s| s.cam).collect(),
        })
    }
}

impl BatchSource for ImageLoader {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch>> + '_> {
        Box::new(
            self.samples
                .chunks(self.batch_size)
                .map(move |chunk| self.load_batch(chunk)),
        )
    }

    fn num_batches(&self) -> usize {
        self.samples.len().div_ceil(self.batch_size)
    }
}
