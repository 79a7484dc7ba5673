use crate::config::{Normalization, TensorLayout};
use crate::error::Result;
use crate::frame::PixelBuffer;
use image::{imageops, RgbImage};
use ndarray::Array4;

/// Preprocessor for converting frames to model input tensors
#[derive(Debug, Clone)]
pub struct Preprocessor {
    target_width: u32,
    target_height: u32,
    layout: TensorLayout,
    normalization: Normalization,
}

impl Preprocessor {
    pub fn new(
        target_width: u32,
        target_height: u32,
        layout: TensorLayout,
        normalization: Normalization,
    ) -> Self {
        Self {
            target_width,
            target_height,
            layout,
            normalization,
        }
    }

    pub fn target_size(&self) -> (u32, u32) {
        (self.target_width, self.target_height)
    }

    /// Preprocess a frame into a normalized tensor
    ///
    /// Steps:
    /// 1. Convert to packed RGB
    /// 2. Resize to target dimensions (bilinear)
    /// 3. Normalize each channel with `(v - mean) / scale`
    /// 4. Lay out as NCHW or NHWC
    pub fn preprocess(&self, frame: &PixelBuffer<'_>) -> Result<Array4<f32>> {
        let _span = tracing::debug_span!("preprocess").entered();

        let rgb = frame.to_rgb_image()?;
        let resized = if rgb.dimensions() != (self.target_width, self.target_height) {
            imageops::resize(
                &rgb,
                self.target_width,
                self.target_height,
                imageops::FilterType::Triangle,
            )
        } else {
            rgb
        };

        Ok(self.to_tensor(&resized))
    }

    fn to_tensor(&self, image: &RgbImage) -> Array4<f32> {
        let (width, height) = image.dimensions();
        let (w, h) = (width as usize, height as usize);
        let mut tensor = match self.layout {
            TensorLayout::Nchw => Array4::<f32>::zeros((1, 3, h, w)),
            TensorLayout::Nhwc => Array4::<f32>::zeros((1, h, w, 3)),
        };

        let Normalization { mean, scale } = self.normalization;

        for (x, y, pixel) in image.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for c in 0..3 {
                let value = (pixel[c] as f32 - mean) / scale;
                match self.layout {
                    TensorLayout::Nchw => tensor[[0, c, y, x]] = value,
                    TensorLayout::Nhwc => tensor[[0, y, x, c]] = value,
                }
            }
        }

        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn deeplab(width: u32, height: u32, layout: TensorLayout) -> Preprocessor {
        Preprocessor::new(width, height, layout, Normalization::default())
    }

    #[test]
    fn nchw_shape_and_range() {
        let data = vec![255u8; 4 * 4 * 4];
        let frame = PixelBuffer::packed(&data, 4, 4, PixelFormat::Bgra8).unwrap();
        let tensor = deeplab(8, 6, TensorLayout::Nchw).preprocess(&frame).unwrap();

        assert_eq!(tensor.shape(), &[1, 3, 6, 8]);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-2));
    }

    #[test]
    fn nhwc_keeps_channel_order() {
        // One BGRA pixel: blue=0, green=0, red=255
        let data = [0u8, 0, 255, 255];
        let frame = PixelBuffer::packed(&data, 1, 1, PixelFormat::Bgra8).unwrap();
        let tensor = deeplab(1, 1, TensorLayout::Nhwc).preprocess(&frame).unwrap();

        assert_eq!(tensor.shape(), &[1, 1, 1, 3]);
        assert!((tensor[[0, 0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 0, 0, 2]] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn custom_normalization() {
        let data = [51u8, 102, 204];
        let frame = PixelBuffer::packed(&data, 1, 1, PixelFormat::Rgb8).unwrap();
        let unit = Normalization {
            mean: 0.0,
            scale: 255.0,
        };
        let tensor = Preprocessor::new(1, 1, TensorLayout::Nchw, unit)
            .preprocess(&frame)
            .unwrap();

        assert!((tensor[[0, 0, 0, 0]] - 0.2).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 0.4).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 0.8).abs() < 1e-6);
    }
}
