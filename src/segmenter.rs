//! The frame segmenter: one owned model, one frame in, one mask out

use crate::config::{MaskResolution, Normalization, SegmenterConfig};
use crate::error::{Result, SegmentError};
use crate::frame::PixelBuffer;
use crate::mask::SegmentationMask;
use crate::segmentation::{labels_from_output, ModelLoader, OnnxModelLoader, Preprocessor, SegmentationModel};
use std::time::{Duration, Instant};

/// Segmenter backed by the ONNX Runtime DeepLab model
pub type DeepLabSegmenter = FrameSegmenter<OnnxModelLoader>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    Unloaded,
    Ready,
}

/// Timing counters for `process` calls
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmenterStats {
    pub frames: u64,
    pub total_time: Duration,
    pub last_time: Duration,
    /// Frames that took longer than the configured budget
    pub over_budget: u64,
    pub last_over_budget: bool,
}

impl SegmenterStats {
    pub fn average_time(&self) -> Duration {
        if self.frames == 0 {
            return Duration::ZERO;
        }
        self.total_time.div_f64(self.frames as f64)
    }
}

struct LoadedModel<M> {
    model: M,
    preprocessor: Preprocessor,
}

/// Owns a segmentation model and turns frames into class-label masks
///
/// Starts Unloaded. `load_model` moves it to Ready; a failed load always
/// leaves it Unloaded, even if a model was loaded before. `process` only
/// succeeds while Ready.
pub struct FrameSegmenter<L: ModelLoader> {
    loader: L,
    loaded: Option<LoadedModel<L::Model>>,
    normalization: Normalization,
    num_classes: usize,
    mask_resolution: MaskResolution,
    frame_budget: Option<Duration>,
    stats: SegmenterStats,
}

impl FrameSegmenter<OnnxModelLoader> {
    /// Segmenter for the model described by `config`; call `load_model` next
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        let loader = OnnxModelLoader::new(config.clone());
        Self::with_loader(loader, &config)
    }
}

impl<L: ModelLoader> FrameSegmenter<L> {
    pub fn with_loader(loader: L, config: &SegmenterConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            loader,
            loaded: None,
            normalization: config.normalization,
            num_classes: config.num_classes,
            mask_resolution: config.mask_resolution,
            frame_budget: config.frame_budget,
            stats: SegmenterStats::default(),
        })
    }

    /// Load (or reload) the model, returning whether the segmenter is Ready
    pub fn load_model(&mut self) -> bool {
        match self.try_load_model() {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to load model from {}: {}", self.loader.source(), e);
                false
            }
        }
    }

    /// Like `load_model`, but keeps the error
    pub fn try_load_model(&mut self) -> Result<()> {
        // Drop any previous model first so a failed reload leaves us Unloaded
        if self.loaded.take().is_some() {
            tracing::info!("Reloading model, previous model released");
        }

        let model = self.loader.load()?;
        let (width, height) = model.input_size();
        if width == 0 || height == 0 {
            return Err(SegmentError::ModelLoad(format!(
                "model reports input size {}x{}",
                width, height
            )));
        }

        let preprocessor = Preprocessor::new(width, height, model.input_layout(), self.normalization);
        self.loaded = Some(LoadedModel {
            model,
            preprocessor,
        });

        tracing::info!("Segmenter ready ({}x{} input)", width, height);
        Ok(())
    }

    /// Release the model and return to Unloaded
    pub fn unload(&mut self) {
        self.loaded = None;
    }

    pub fn state(&self) -> SegmenterState {
        if self.loaded.is_some() {
            SegmenterState::Ready
        } else {
            SegmenterState::Unloaded
        }
    }

    pub fn is_ready(&self) -> bool {
        self.loaded.is_some()
    }

    /// Model input size while Ready
    pub fn input_size(&self) -> Option<(u32, u32)> {
        self.loaded.as_ref().map(|l| l.preprocessor.target_size())
    }

    pub fn stats(&self) -> &SegmenterStats {
        &self.stats
    }

    /// Segment one frame
    ///
    /// The frame is only read during the call. The returned mask belongs to the
    /// caller; later calls never touch it.
    ///
    /// # Errors
    /// * `ModelNotLoaded` while Unloaded
    /// * `Inference` if the model fails or returns an unusable shape
    pub fn process(&mut self, frame: &PixelBuffer<'_>) -> Result<SegmentationMask> {
        let _span = tracing::debug_span!("segment_frame").entered();

        let loaded = self.loaded.as_mut().ok_or(SegmentError::ModelNotLoaded)?;
        let start = Instant::now();

        let input = loaded.preprocessor.preprocess(frame)?;
        let output = loaded.model.infer(input.view())?;
        let mask = labels_from_output(output.view(), self.num_classes)?;

        let mask = match self.mask_resolution {
            MaskResolution::Model => mask,
            MaskResolution::Frame => mask.resized(frame.width(), frame.height())?,
        };

        self.record(start.elapsed());
        Ok(mask)
    }

    fn record(&mut self, elapsed: Duration) {
        self.stats.frames += 1;
        self.stats.total_time += elapsed;
        self.stats.last_time = elapsed;

        let over = self.frame_budget.is_some_and(|budget| elapsed > budget);
        self.stats.last_over_budget = over;
        if over {
            self.stats.over_budget += 1;
            tracing::warn!(
                "Frame {} took {:.1}ms, over budget",
                self.stats.frames,
                elapsed.as_secs_f64() * 1000.0
            );
        }
    }
}
