use anyhow::Result;
use image::{imageops::FilterType, DynamicImage};
use ndarray::{Array3, ArrayViewMut3};

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Test-time preprocessing: rectangular rescale, scale to [0, 1], then
/// per-channel normalisation. Output is CHW in RGB order.
#[derive(Debug, Clone)]
pub struct Transform {
    pub height: u32,
    pub width: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Transform {
    pub fn new(height: u32, width: u32) -> Self {
        Self {
            height,
            width,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    pub fn apply(&self, img: &DynamicImage) -> Result<Array3<f32>> {
        let mut out = Array3::zeros((3, self.height as usize, self.width as usize));
        self.apply_into(img, out.view_mut())?;
        Ok(out)
    }

    /// Write the transformed image into a preallocated `(3, H, W)` slot.
    pub fn apply_into(&self, img: &DynamicImage, mut out: ArrayViewMut3<'_, f32>) -> Result<()> {
        let expected = [3, self.height as usize, self.width as usize];
        if out.shape() != expected {
            anyhow::bail!(
                "transform target has shape {:?}, expected {:?}",
                out.shape(),
                expected
            );
        }

        // Bicubic, like PIL's interpolation=3
        let resized = img.resize_exact(self.width, self.height, FilterType::CatmullRom);
        let rgb = resized.to_rgb8();

        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let v = pixel[c] as f32 / 255.0;
                out[[c, y as usize, x as usize]] = (v - self.mean[c]) / self.std[c];
            }
        }
        Ok(())
    }
}
