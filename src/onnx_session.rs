//! ONNX Runtime session construction and device selection.

use std::path::Path;

use ort::execution_providers::{
    CPU as CPUExecutionProvider, CUDA as CUDAExecutionProvider, ExecutionProvider,
    ExecutionProviderDispatch,
};
use ort::session::Session;

use crate::error::{EndoscanError, Result};

/// Configuration for creating ONNX sessions
pub struct SessionConfig<'a> {
    pub device: &'a str,
}

/// Device selection result
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub device: String,
    pub reason: String,
}

/// Determine optimal device based on user preference
pub fn determine_optimal_device(requested_device: &str) -> DeviceSelection {
    match requested_device {
        "auto" => {
            // For auto, prefer CUDA if available, otherwise CPU
            match CUDAExecutionProvider::default().is_available() {
                Ok(true) => DeviceSelection {
                    device: "cuda".to_string(),
                    reason: "Auto-selected CUDA (available)".to_string(),
                },
                _ => DeviceSelection {
                    device: "cpu".to_string(),
                    reason: "Auto-selected CPU (CUDA not available)".to_string(),
                },
            }
        }
        other => DeviceSelection {
            device: other.to_string(),
            reason: format!("User explicitly chose {other}"),
        },
    }
}

fn execution_providers(device: &str) -> Vec<ExecutionProviderDispatch> {
    match device {
        "cuda" => match CUDAExecutionProvider::default().is_available() {
            Ok(true) => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            _ => {
                log::warn!("⚠️  CUDA not available, falling back to CPU");
                vec![CPUExecutionProvider::default().build()]
            }
        },
        "cpu" => vec![CPUExecutionProvider::default().build()],
        other => {
            log::warn!("⚠️  Unknown device '{other}', using CPU");
            vec![CPUExecutionProvider::default().build()]
        }
    }
}

/// Create an ONNX Runtime session from a weights file.
///
/// Any failure (missing file, corrupt weights, incompatible architecture)
/// surfaces as [`EndoscanError::ModelLoad`] for this model only; the caller
/// may retry later.
pub fn create_onnx_session(
    model_id: &str,
    weights_path: &Path,
    config: &SessionConfig,
) -> Result<Session> {
    if !weights_path.exists() {
        return Err(EndoscanError::ModelLoad {
            model_id: model_id.to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("weights file not found: {}", weights_path.display()),
            )),
        });
    }

    log::debug!(
        "🧠 Loading model '{}' from {} on {}",
        model_id,
        weights_path.display(),
        config.device
    );

    let providers = execution_providers(config.device);
    let built: std::result::Result<Session, ort::Error> = (|| {
        Session::builder()?
            .with_execution_providers(providers)?
            .with_memory_pattern(true)?
            .commit_from_file(weights_path)
    })();

    built.map_err(|e| EndoscanError::ModelLoad {
        model_id: model_id.to_string(),
        source: Box::new(e),
    })
}
