use anyhow::{Context, Result};
use ndarray::{ArrayD, ArrayView4, IxDyn};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::{
    session::{
        builder::{GraphOptimizationLevel, SessionBuilder},
        Session,
    },
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Which head of the network produces the embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFeature {
    /// Final embedding layer, always `(batch, dim)`.
    #[default]
    Fc,
    /// Pooled backbone activations, `(batch, C)` or `(batch, C, H, W)`.
    Pool5,
}

impl OutputFeature {
    pub fn output_name(self) -> &'static str {
        match self {
            OutputFeature::Fc => "fc",
            OutputFeature::Pool5 => "pool5",
        }
    }

    fn fallback_position(self) -> usize {
        match self {
            OutputFeature::Fc => 0,
            OutputFeature::Pool5 => 1,
        }
    }
}

impl std::str::FromStr for OutputFeature {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fc" => Ok(OutputFeature::Fc),
            "pool5" => Ok(OutputFeature::Pool5),
            other => anyhow::bail!("unknown output feature '{}', expected fc or pool5", other),
        }
    }
}

/// A trained network that maps an image batch `(batch, 3, H, W)` to features.
///
/// Implementations declare up front which output they produce so callers can
/// validate the returned rank instead of guessing from the shape.
pub trait FeatureModel {
    fn output_feature(&self) -> OutputFeature;

    /// Switch to inference behaviour (frozen normalisation, no dropout).
    fn eval_mode(&mut self) {}

    fn forward(&mut self, images: ArrayView4<'_, f32>) -> Result<ArrayD<f32>>;
}

impl<M: FeatureModel + ?Sized> FeatureModel for Box<M> {
    fn output_feature(&self) -> OutputFeature {
        (**self).output_feature()
    }

    fn eval_mode(&mut self) {
        (**self).eval_mode()
    }

    fn forward(&mut self, images: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        (**self).forward(images)
    }
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

/// Re-ID backbone exported to ONNX (PCB, IDE, ...).
pub struct OnnxModel {
    session: Session,
    output_feature: OutputFeature,
}

impl OnnxModel {
    pub fn from_file(path: &Path, output_feature: OutputFeature) -> Result<Self> {
        let session = session_builder()?
            .commit_from_file(path)
            .with_context(|| format!("load model {}", path.display()))?;
        log::info!(
            "Loaded {} (embedding from '{}')",
            path.display(),
            output_feature.output_name()
        );
        Ok(Self {
            session,
            output_feature,
        })
    }
}

impl FeatureModel for OnnxModel {
    fn output_feature(&self) -> OutputFeature {
        self.output_feature
    }

    fn forward(&mut self, images: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let wanted = self.output_feature.output_name();
        let fallback = self.output_feature.fallback_position();

        let input_tensor = Value::from_array(images.to_owned())?;
        let outputs = self.session.run(ort::inputs![input_tensor])?;

        let selected = outputs
            .iter()
            .find(|(name, _)| *name == wanted)
            .or_else(|| outputs.iter().nth(fallback))
            .map(|(_, value)| value)
            .with_context(|| format!("model has no '{}' output", wanted))?;

        let (shape, data) = selected.try_extract_tensor::<f32>()?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        ArrayD::from_shape_vec(IxDyn(&dims), data.to_vec()).context("reshape model output")
    }
}
