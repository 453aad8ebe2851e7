pub mod box_detection;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod image_input;
pub mod instance_segmentation;
pub mod mocks;
pub mod onnx_session;
pub mod overlay;
pub mod registry;
pub mod scan;
pub mod semantic_segmentation;
pub mod summary;

pub use detection::{Detection, InferenceResult, TaskKind, RESULT_SCHEMA_VERSION};
pub use error::{EndoscanError, Result};
pub use registry::{ModelRegistry, RegistryBuilder, TaskPredictor};
