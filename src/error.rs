use thiserror::Error;

pub type Result<T> = std::result::Result<T, SegmentError>;

/// Errors surfaced by the segmentation core
#[derive(Error, Debug)]
pub enum SegmentError {
    /// Model resource missing, empty, or rejected by the runtime
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// `process` called before a successful `load_model`
    #[error("model not loaded")]
    ModelNotLoaded,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl SegmentError {
    /// True for every error caused by the model resource not being ready
    pub fn is_model_load(&self) -> bool {
        matches!(self, SegmentError::ModelLoad(_) | SegmentError::ModelNotLoaded)
    }
}

impl From<ort::Error> for SegmentError {
    fn from(err: ort::Error) -> Self {
        SegmentError::Inference(err.to_string())
    }
}

impl From<ndarray::ShapeError> for SegmentError {
    fn from(err: ndarray::ShapeError) -> Self {
        SegmentError::Inference(format!("unexpected tensor shape: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_load_class_covers_not_loaded() {
        assert!(SegmentError::ModelNotLoaded.is_model_load());
        assert!(SegmentError::ModelLoad("missing".into()).is_model_load());
        assert!(!SegmentError::InvalidFrame("zero width".into()).is_model_load());
        assert!(!SegmentError::Inference("boom".into()).is_model_load());
    }

    #[test]
    fn display_includes_detail() {
        let err = SegmentError::InvalidFrame("stride 3 is smaller than row".into());
        assert_eq!(err.to_string(), "invalid frame: stride 3 is smaller than row");
    }
}
