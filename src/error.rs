use thiserror::Error;

use crate::detection::TaskKind;

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Structured error types for the endoscan core.
///
/// The taxonomy mirrors how failures propagate through a request:
/// `UnknownModel` rejects before any compute happens, `ModelLoad` fails a
/// single request while leaving the registry entry retryable, and
/// `UnsupportedTask` marks a registry/predictor configuration defect.
/// Geometry degeneracies (empty masks, nothing above threshold) are not
/// errors anywhere in the crate; they produce valid empty results.
#[derive(Error, Debug)]
pub enum EndoscanError {
    #[error("unknown or unavailable model '{name}'")]
    UnknownModel { name: String },

    #[error("failed to load model '{model_id}'")]
    ModelLoad {
        model_id: String,
        #[source]
        source: BoxedSource,
    },

    #[error("model '{model_id}' is registered for task '{expected}' but its loader produced a '{actual}' predictor")]
    UnsupportedTask {
        model_id: String,
        expected: TaskKind,
        actual: TaskKind,
    },

    #[error("image processing failed")]
    Image(#[from] image::ImageError),

    #[error("inference failed: {operation}")]
    Inference {
        operation: String,
        #[source]
        source: BoxedSource,
    },
}

pub type Result<T> = std::result::Result<T, EndoscanError>;

impl From<ort::Error> for EndoscanError {
    fn from(err: ort::Error) -> Self {
        Self::Inference {
            operation: "onnx runtime call".to_string(),
            source: Box::new(err),
        }
    }
}

impl From<ndarray::ShapeError> for EndoscanError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Inference {
            operation: "tensor shape conversion".to_string(),
            source: Box::new(err),
        }
    }
}
