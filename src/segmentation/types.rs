use crate::config::TensorLayout;
use crate::error::Result;
use ndarray::{ArrayD, ArrayView4};

/// Trait for segmentation models
/// Allows swapping the inference backend (ONNX Runtime, test doubles, etc.)
pub trait SegmentationModel {
    /// Run the network on a preprocessed input tensor
    ///
    /// # Arguments
    /// * `input` - Normalized image tensor in `input_layout()` order
    ///
    /// # Returns
    /// * Per-class logits (`[1, C, H, W]` or `[1, H, W, C]`) or an already
    ///   argmaxed label map (`[1, H, W]`)
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>>;

    /// Get the model's input dimensions
    ///
    /// Returns (width, height)
    fn input_size(&self) -> (u32, u32);

    fn input_layout(&self) -> TensorLayout {
        TensorLayout::Nchw
    }
}

/// Locates and initializes a model resource
///
/// The segmenter owns its loader so `load_model` needs no arguments; the
/// loader knows where the model lives.
pub trait ModelLoader {
    type Model: SegmentationModel;

    fn load(&self) -> Result<Self::Model>;

    /// Human readable description of where the model comes from
    fn source(&self) -> String;
}
