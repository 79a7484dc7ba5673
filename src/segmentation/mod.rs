mod deeplab;
mod postprocess;
mod preprocess;
pub mod types;

pub use deeplab::{OnnxDeepLab, OnnxModelLoader};
pub use postprocess::labels_from_output;
pub use preprocess::Preprocessor;
pub use types::{ModelLoader, SegmentationModel};
