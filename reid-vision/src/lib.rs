pub mod loader;
pub mod model;
pub mod sample;
pub mod transform;

// Re-export commonly used types
pub use loader::{BatchSource, ImageLoader};
pub use model::{FeatureModel, OnnxModel, OutputFeature};
pub use sample::{Batch, Sample};
pub use transform::Transform;
