//! Live semantic segmentation of video frames with a DeepLab model
//!
//! A [`FrameSegmenter`] owns one loaded model. Frames come in as borrowed
//! [`PixelBuffer`] views and leave as owned [`SegmentationMask`]s holding one
//! class-index byte per cell.
//!
//! ```no_run
//! use segmentation_live::{DeepLabSegmenter, PixelBuffer, PixelFormat, SegmenterConfig};
//!
//! # fn main() -> segmentation_live::Result<()> {
//! let mut segmenter = DeepLabSegmenter::new(SegmenterConfig::default())?;
//! if !segmenter.load_model() {
//!     panic!("can't load model");
//! }
//!
//! let bgra = vec![0u8; 1280 * 720 * 4];
//! let frame = PixelBuffer::packed(&bgra, 1280, 720, PixelFormat::Bgra8)?;
//! let mask = segmenter.process(&frame)?;
//! println!("person coverage: {:.2}", mask.coverage(15));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod mask;
pub mod segmentation;
pub mod segmenter;

pub use config::{
    Accelerator, MaskResolution, ModelSource, Normalization, SegmenterConfig, TensorLayout,
};
pub use error::{Result, SegmentError};
pub use frame::{PixelBuffer, PixelFormat};
pub use mask::{composite, Palette, SegmentationMask, PASCAL_VOC_CLASSES};
pub use segmentation::{ModelLoader, OnnxDeepLab, OnnxModelLoader, SegmentationModel};
pub use segmenter::{DeepLabSegmenter, FrameSegmenter, SegmenterState, SegmenterStats};
