use super::types::{ModelLoader, SegmentationModel};
use crate::config::{Accelerator, ModelSource, SegmenterConfig, TensorLayout};
use crate::error::{Result, SegmentError};
use ndarray::{ArrayD, ArrayView4, ArrayViewD, Axis};
use ort::execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::tensor::TensorElementType;
use ort::value::TensorRef;

/// DeepLab semantic segmentation model running on ONNX Runtime
///
/// Stateless between frames: every call sees only the frame it is given.
pub struct OnnxDeepLab {
    session: Session,
    input_name: String,
    output_name: String,
    width: u32,
    height: u32,
    layout: TensorLayout,
}

impl OnnxDeepLab {
    /// Build an ONNX Runtime session for `source`
    ///
    /// # Default Configuration
    /// - Input size: 257x257, the resolution the mobile DeepLab export uses
    /// - Graph optimization level 3, 4 intra-op threads
    pub fn load(source: &ModelSource, config: &SegmenterConfig) -> Result<Self> {
        tracing::info!("Loading DeepLab model from {}", source.describe());

        match source {
            ModelSource::File(path) => {
                let metadata = std::fs::metadata(path).map_err(|e| {
                    SegmentError::ModelLoad(format!("{}: {}", path.display(), e))
                })?;
                if !metadata.is_file() || metadata.len() == 0 {
                    return Err(SegmentError::ModelLoad(format!(
                        "{} is not a non-empty model file",
                        path.display()
                    )));
                }
            }
            ModelSource::Memory(bytes) if bytes.is_empty() => {
                return Err(SegmentError::ModelLoad("embedded model is empty".to_string()));
            }
            ModelSource::Memory(_) => {}
        }

        let builder = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(config.intra_threads))
            .map_err(|e| SegmentError::ModelLoad(format!("session builder: {}", e)))?;
        let builder = with_accelerator(builder, config.accelerator)?;

        let session = match source {
            ModelSource::File(path) => builder.commit_from_file(path),
            ModelSource::Memory(bytes) => builder.commit_from_memory(bytes),
        }
        .map_err(|e| SegmentError::ModelLoad(format!("{}: {}", source.describe(), e)))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| SegmentError::ModelLoad("model declares no inputs".to_string()))?;
        let input_name = input.name.clone();
        let dims = input.input_type.tensor_shape().ok_or_else(|| {
            SegmentError::ModelLoad(format!("input '{}' is not a tensor", input_name))
        })?;
        let ((width, height), layout) =
            input_geometry(dims, config.input_size, config.input_layout)?;
        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .ok_or_else(|| SegmentError::ModelLoad("model declares no outputs".to_string()))?;

        tracing::info!("DeepLab model loaded successfully");
        tracing::debug!("Model input '{}', output '{}'", input_name, output_name);
        if let Ok(producer) = session.metadata().and_then(|m| m.producer_name()) {
            tracing::debug!("Model producer: {}", producer);
        }

        if (width, height) != config.input_size || layout != config.input_layout {
            tracing::info!(
                "Model declares {}x{} {:?} input, overriding configured {}x{} {:?}",
                width,
                height,
                layout,
                config.input_size.0,
                config.input_size.1,
                config.input_layout
            );
        }

        Ok(Self {
            session,
            input_name,
            output_name,
            width,
            height,
            layout,
        })
    }
}

/// Input size and layout from the declared input shape
///
/// The 3-channel axis decides the layout: `[N, 3, H, W]` is NCHW and
/// `[N, H, W, 3]` is NHWC. Dynamic dimensions (reported as -1) take the
/// configured value.
fn input_geometry(
    dims: &[i64],
    configured_size: (u32, u32),
    configured_layout: TensorLayout,
) -> Result<((u32, u32), TensorLayout)> {
    if dims.len() != 4 {
        return Err(SegmentError::ModelLoad(format!(
            "expected a rank-4 image input, model declares {:?}",
            dims
        )));
    }

    let layout = match (dims[1], dims[3]) {
        (3, _) => TensorLayout::Nchw,
        (_, 3) => TensorLayout::Nhwc,
        (c, last) if c < 0 && last < 0 => configured_layout,
        _ => {
            return Err(SegmentError::ModelLoad(format!(
                "input {:?} has no 3-channel axis",
                dims
            )))
        }
    };

    let (h, w) = match layout {
        TensorLayout::Nchw => (dims[2], dims[3]),
        TensorLayout::Nhwc => (dims[1], dims[2]),
    };
    let width = declared_extent(w, configured_size.0, dims)?;
    let height = declared_extent(h, configured_size.1, dims)?;

    Ok(((width, height), layout))
}

fn declared_extent(dim: i64, configured: u32, dims: &[i64]) -> Result<u32> {
    if dim < 0 {
        return Ok(configured);
    }
    match u32::try_from(dim) {
        Ok(extent) if extent > 0 => Ok(extent),
        _ => Err(SegmentError::ModelLoad(format!(
            "unusable input extent {} in {:?}",
            dim, dims
        ))),
    }
}

/// Integer label map (ONNX `ArgMax` emits int64) as scores for the label path
///
/// A kept singleton class axis (`[1, 1, H, W]` or `[1, H, W, 1]`) is dropped so
/// the map reads as `[1, H, W]`.
fn label_map_scores<T: Copy + Into<i64>>(labels: ArrayViewD<'_, T>) -> ArrayD<f32> {
    let scores = labels.mapv(|label| Into::<i64>::into(label) as f32);
    if scores.ndim() != 4 {
        return scores;
    }
    if scores.shape()[1] == 1 {
        scores.remove_axis(Axis(1))
    } else if scores.shape()[3] == 1 {
        scores.remove_axis(Axis(3))
    } else {
        scores
    }
}

fn with_accelerator(builder: SessionBuilder, accelerator: Accelerator) -> Result<SessionBuilder> {
    let builder = match accelerator {
        Accelerator::Cpu => return Ok(builder),
        Accelerator::Cuda => {
            builder.with_execution_providers([CUDAExecutionProvider::default().build()])
        }
        Accelerator::TensorRt => builder.with_execution_providers([
            TensorRTExecutionProvider::default().build(),
            CUDAExecutionProvider::default().build(),
        ]),
    };

    // Unavailable providers fall back to CPU inside ONNX Runtime
    tracing::info!("Requested {:?} execution provider", accelerator);
    builder.map_err(|e| SegmentError::ModelLoad(format!("execution provider: {}", e)))
}

impl SegmentationModel for OnnxDeepLab {
    fn infer(&mut self, input: ArrayView4<'_, f32>) -> Result<ArrayD<f32>> {
        let _span = tracing::debug_span!("inference").entered();

        let tensor = TensorRef::from_array_view(input)?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])?;

        let output = &outputs[self.output_name.as_str()];
        let scores = match output.dtype().tensor_type() {
            Some(TensorElementType::Int64) => label_map_scores(output.try_extract_array::<i64>()?),
            Some(TensorElementType::Int32) => label_map_scores(output.try_extract_array::<i32>()?),
            _ => output.try_extract_array::<f32>()?.to_owned(),
        };

        Ok(scores)
    }

    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn input_layout(&self) -> TensorLayout {
        self.layout
    }
}

/// Loads `OnnxDeepLab` from the configured model source
#[derive(Debug, Clone)]
pub struct OnnxModelLoader {
    config: SegmenterConfig,
}

impl OnnxModelLoader {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }
}

impl ModelLoader for OnnxModelLoader {
    type Model = OnnxDeepLab;

    fn load(&self) -> Result<OnnxDeepLab> {
        OnnxDeepLab::load(&self.config.model, &self.config)
    }

    fn source(&self) -> String {
        self.config.model.describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_a_load_error() {
        let config = SegmenterConfig::default()
            .with_model(ModelSource::File("/nonexistent/deeplab.onnx".into()));
        let err = OnnxModelLoader::new(config).load().err().unwrap();
        assert!(matches!(err, SegmentError::ModelLoad(_)));
    }

    #[test]
    fn empty_file_is_a_load_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = SegmenterConfig::default().with_model(ModelSource::File(file.path().into()));
        let err = OnnxModelLoader::new(config).load().err().unwrap();
        assert!(err.is_model_load());
    }

    #[test]
    fn directory_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = SegmenterConfig::default().with_model(ModelSource::File(dir.path().into()));
        assert!(OnnxModelLoader::new(config).load().is_err());
    }

    #[test]
    fn empty_embedded_model_is_a_load_error() {
        let config = SegmenterConfig::default().with_model(ModelSource::Memory(Vec::new()));
        let loader = OnnxModelLoader::new(config);
        assert_eq!(loader.source(), "<embedded, 0 bytes>");
        assert!(loader.load().is_err());
    }

    #[test]
    fn geometry_follows_declared_nchw_input() {
        let (size, layout) =
            input_geometry(&[1, 3, 513, 385], (257, 257), TensorLayout::Nhwc).unwrap();
        assert_eq!(size, (385, 513));
        assert_eq!(layout, TensorLayout::Nchw);
    }

    #[test]
    fn geometry_follows_declared_nhwc_input() {
        let (size, layout) =
            input_geometry(&[1, 257, 257, 3], (257, 257), TensorLayout::Nchw).unwrap();
        assert_eq!(size, (257, 257));
        assert_eq!(layout, TensorLayout::Nhwc);
    }

    #[test]
    fn dynamic_input_dimensions_use_configuration() {
        let (size, layout) =
            input_geometry(&[-1, 3, -1, -1], (320, 240), TensorLayout::Nchw).unwrap();
        assert_eq!(size, (320, 240));
        assert_eq!(layout, TensorLayout::Nchw);

        let (size, layout) =
            input_geometry(&[-1, -1, 200, -1], (320, 240), TensorLayout::Nhwc).unwrap();
        assert_eq!(size, (200, 240));
        assert_eq!(layout, TensorLayout::Nhwc);
    }

    #[test]
    fn unusable_input_shape_is_a_load_error() {
        let size = (257, 257);
        for dims in [
            &[1, 3, 257][..],
            &[1, 1, 257, 257][..],
            &[1, 3, 0, 257][..],
            &[1, 257, 257, 4][..],
        ] {
            let err = input_geometry(dims, size, TensorLayout::Nchw).unwrap_err();
            assert!(err.is_model_load(), "{:?} accepted", dims);
        }
    }

    #[test]
    fn argmax_label_maps_reach_the_label_path() {
        let argmax = ndarray::Array4::<i64>::from_shape_vec((1, 1, 2, 2), vec![0, 15, 7, 99])
            .unwrap()
            .into_dyn();
        let scores = label_map_scores(argmax.view());
        assert_eq!(scores.shape(), &[1, 2, 2]);

        let mask = crate::segmentation::labels_from_output(scores.view(), 21).unwrap();
        assert_eq!(mask.as_bytes(), &[0, 15, 7, 20]);

        let nhwc = ndarray::Array4::<i32>::from_shape_vec((1, 2, 3, 1), vec![2, 1, 0, 3, 4, 5])
            .unwrap()
            .into_dyn();
        let scores = label_map_scores(nhwc.view());
        let mask = crate::segmentation::labels_from_output(scores.view(), 21).unwrap();
        assert_eq!(mask.dimensions(), (3, 2));
        assert_eq!(mask.as_bytes(), &[2, 1, 0, 3, 4, 5]);
    }

    #[test]
    fn loader_describes_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"x").unwrap();
        let config = SegmenterConfig::default().with_model(ModelSource::File(file.path().into()));
        let loader = OnnxModelLoader::new(config);
        assert_eq!(loader.source(), file.path().display().to_string());
    }
}
