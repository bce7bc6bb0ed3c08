use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting RGB frames to detector input tensors
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
}

impl Preprocessor {
    pub fn new(target_width: u32, target_height: u32) -> Self {
        Self {
            target_width,
            target_height,
        }
    }

    /// Preprocess an RGB image into a normalized NCHW tensor
    ///
    /// Steps:
    /// 1. Resize to target dimensions (no letterboxing, aspect is not kept)
    /// 2. Convert to float and normalize to [0, 1]
    /// 3. Transpose from HWC to NCHW format
    ///
    /// Returns: Array4<f32> with shape [1, 3, height, width]
    pub fn preprocess(&self, image: &RgbImage) -> Array4<f32> {
        let _span = tracing::debug_span!("preprocess").entered();

        let resized = if image.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                image,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            image.clone()
        };

        let (width, height) = resized.dimensions();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            tensor[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
            tensor[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
            tensor[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
        }

        tensor
    }

    /// Factors mapping model-input pixels back to frame pixels
    ///
    /// Returns (scale_x, scale_y)
    pub fn scale_to_frame(&self, frame_width: u32, frame_height: u32) -> (f32, f32) {
        (
            frame_width as f32 / self.target_width as f32,
            frame_height as f32 / self.target_height as f32,
        )
    }
}
