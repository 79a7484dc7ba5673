//! Segmenter configuration and model resource resolution

use crate::error::{Result, SegmentError};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides the bundled model location
pub const MODEL_ENV_VAR: &str = "SEGMENTATION_LIVE_MODEL";

/// File name of the bundled DeepLab model
pub const DEFAULT_MODEL_FILE: &str = "deeplabv3_257.onnx";

/// Where the model bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    File(PathBuf),
    /// Model embedded in the binary, e.g. with `include_bytes!`
    Memory(Vec<u8>),
}

impl ModelSource {
    /// Resolve the bundled model
    ///
    /// Looks at `SEGMENTATION_LIVE_MODEL`, then `models/` next to the
    /// executable, then `models/` in the working directory. When none exist the
    /// working-directory path is returned and loading reports it as missing.
    pub fn bundled() -> Self {
        if let Some(path) = std::env::var_os(MODEL_ENV_VAR) {
            return ModelSource::File(PathBuf::from(path));
        }

        let local = Path::new("models").join(DEFAULT_MODEL_FILE);
        let beside_exe = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join("models").join(DEFAULT_MODEL_FILE)));

        match beside_exe {
            Some(path) if path.is_file() => ModelSource::File(path),
            _ => ModelSource::File(local),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ModelSource::File(path) => path.display().to_string(),
            ModelSource::Memory(bytes) => format!("<embedded, {} bytes>", bytes.len()),
        }
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::bundled()
    }
}

/// Dimension order of the model's image input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorLayout {
    /// [1, 3, H, W]
    Nchw,
    /// [1, H, W, 3]
    Nhwc,
}

/// Resolution of masks returned by `process`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskResolution {
    /// Whatever the model outputs (257x257 for the reference DeepLab)
    #[default]
    Model,
    /// Upscaled to the input frame with nearest-neighbour sampling
    Frame,
}

/// ONNX Runtime execution provider to request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Accelerator {
    #[default]
    Cpu,
    Cuda,
    TensorRt,
}

/// Pixel normalization `(value - mean) / scale` applied to every channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normalization {
    pub mean: f32,
    pub scale: f32,
}

impl Default for Normalization {
    /// DeepLab mobile models expect inputs in [-1, 1]
    fn default() -> Self {
        Self {
            mean: 127.5,
            scale: 127.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub model: ModelSource,
    /// Model input size (width, height)
    pub input_size: (u32, u32),
    pub input_layout: TensorLayout,
    pub normalization: Normalization,
    /// Number of classes the model scores; labels are stored as bytes
    pub num_classes: usize,
    pub mask_resolution: MaskResolution,
    pub accelerator: Accelerator,
    pub intra_threads: usize,
    /// Inference calls slower than this are logged and counted
    pub frame_budget: Option<Duration>,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            model: ModelSource::bundled(),
            input_size: (257, 257),
            input_layout: TensorLayout::Nchw,
            normalization: Normalization::default(),
            num_classes: 21,
            mask_resolution: MaskResolution::Model,
            accelerator: Accelerator::Cpu,
            intra_threads: 4,
            frame_budget: None,
        }
    }
}

impl SegmenterConfig {
    pub fn with_model(mut self, model: ModelSource) -> Self {
        self.model = model;
        self
    }

    pub fn with_mask_resolution(mut self, resolution: MaskResolution) -> Self {
        self.mask_resolution = resolution;
        self
    }

    pub fn with_frame_budget(mut self, budget: Duration) -> Self {
        self.frame_budget = Some(budget);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let (w, h) = self.input_size;
        if w == 0 || h == 0 {
            return Err(SegmentError::Config(format!(
                "model input size must be non-zero, got {}x{}",
                w, h
            )));
        }

        if self.num_classes == 0 || self.num_classes > 256 {
            return Err(SegmentError::Config(format!(
                "num_classes must be between 1 and 256, got {}",
                self.num_classes
            )));
        }

        if !(self.normalization.scale.is_finite() && self.normalization.scale != 0.0) {
            return Err(SegmentError::Config(
                "normalization scale must be finite and non-zero".to_string(),
            ));
        }

        if self.intra_threads == 0 {
            return Err(SegmentError::Config("intra_threads must be at least 1".to_string()));
        }

        Ok(())
    }
}
