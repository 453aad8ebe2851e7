//! Model registry: model id → task kind + lazily loaded predictor.
//!
//! The registry is an explicit object constructed once at process start and
//! shared by reference; there is no ambient global state. Each entry guards
//! its lazy-load transition with its own mutex, so two concurrent requests
//! for the same unloaded model block on a single load while requests for
//! distinct models proceed independently. Once loaded, a predictor handle
//! is shared immutably for the rest of the process lifetime.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use image::RgbImage;
use parking_lot::Mutex;
use serde::Serialize;

use crate::box_detection::{BoxPredictor, DetectionParams, OnnxBoxModel};
use crate::detection::{InferenceResult, Prediction, TaskKind};
use crate::error::{EndoscanError, Result};
use crate::instance_segmentation::{InstanceSegParams, InstanceSegPredictor, OnnxInstanceModel};
use crate::onnx_session::{create_onnx_session, determine_optimal_device, SessionConfig};
use crate::semantic_segmentation::{OnnxDenseModel, SemanticSegParams, SemanticSegPredictor};
use crate::summary::{build_result, SizePolicy};

/// One loaded model behind its task-specific pipeline. The variant is the
/// task kind; callers dispatch through [`TaskPredictor::predict`] instead
/// of branching on task at every call site.
pub enum TaskPredictor {
    Detection(BoxPredictor),
    SegmentationInstance(InstanceSegPredictor),
    SegmentationSemantic(SemanticSegPredictor),
}

impl TaskPredictor {
    pub fn task(&self) -> TaskKind {
        match self {
            TaskPredictor::Detection(_) => TaskKind::Detection,
            TaskPredictor::SegmentationInstance(_) => TaskKind::SegmentationInstance,
            TaskPredictor::SegmentationSemantic(_) => TaskKind::SegmentationSemantic,
        }
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Prediction> {
        match self {
            TaskPredictor::Detection(p) => p.predict(image),
            TaskPredictor::SegmentationInstance(p) => p.predict(image),
            TaskPredictor::SegmentationSemantic(p) => p.predict(image),
        }
    }
}

impl std::fmt::Debug for TaskPredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TaskPredictor").field(&self.task()).finish()
    }
}

/// Factory invoked at most once per entry to materialize the predictor.
pub type PredictorLoader = Box<dyn Fn() -> Result<TaskPredictor> + Send + Sync>;

struct ModelEntry {
    task: TaskKind,
    loader: PredictorLoader,
    slot: Mutex<Option<Arc<TaskPredictor>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelDescription {
    pub model_id: String,
    pub task: TaskKind,
    pub loaded: bool,
}

pub struct ModelRegistry {
    entries: HashMap<String, ModelEntry>,
    policy: SizePolicy,
}

#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<String, ModelEntry>,
    policy: Option<SizePolicy>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size_policy(mut self, policy: SizePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Register a lazy entry. The loader runs on first use, under the
    /// entry's lock.
    pub fn register<F>(mut self, model_id: &str, task: TaskKind, loader: F) -> Self
    where
        F: Fn() -> Result<TaskPredictor> + Send + Sync + 'static,
    {
        self.entries.insert(
            model_id.to_string(),
            ModelEntry {
                task,
                loader: Box::new(loader),
                slot: Mutex::new(None),
            },
        );
        self
    }

    pub fn build(self) -> ModelRegistry {
        ModelRegistry {
            entries: self.entries,
            policy: self.policy.unwrap_or_default(),
        }
    }
}

impl ModelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Registered models, sorted by id.
    pub fn models(&self) -> Vec<ModelDescription> {
        let mut models: Vec<ModelDescription> = self
            .entries
            .iter()
            .map(|(id, entry)| ModelDescription {
                model_id: id.clone(),
                task: entry.task,
                loaded: entry.slot.lock().is_some(),
            })
            .collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        models
    }

    pub fn task_of(&self, model_id: &str) -> Result<TaskKind> {
        self.entries
            .get(model_id)
            .map(|entry| entry.task)
            .ok_or_else(|| EndoscanError::UnknownModel {
                name: model_id.to_string(),
            })
    }

    /// Task kind and current handle for an entry, without triggering a
    /// load.
    pub fn resolve(&self, model_id: &str) -> Result<(TaskKind, Option<Arc<TaskPredictor>>)> {
        let entry = self
            .entries
            .get(model_id)
            .ok_or_else(|| EndoscanError::UnknownModel {
                name: model_id.to_string(),
            })?;
        Ok((entry.task, entry.slot.lock().clone()))
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.entries
            .get(model_id)
            .map(|entry| entry.slot.lock().is_some())
            .unwrap_or(false)
    }

    /// Idempotently materialize the entry's predictor.
    ///
    /// Holding the entry lock across the loader call serializes concurrent
    /// loads of the same model; a failed load leaves the slot empty so a
    /// later call may retry.
    pub fn ensure_loaded(&self, model_id: &str) -> Result<Arc<TaskPredictor>> {
        let entry = self
            .entries
            .get(model_id)
            .ok_or_else(|| EndoscanError::UnknownModel {
                name: model_id.to_string(),
            })?;

        let mut slot = entry.slot.lock();
        if let Some(predictor) = slot.as_ref() {
            return Ok(Arc::clone(predictor));
        }

        let predictor = (entry.loader)()?;
        if predictor.task() != entry.task {
            return Err(EndoscanError::UnsupportedTask {
                model_id: model_id.to_string(),
                expected: entry.task,
                actual: predictor.task(),
            });
        }

        let predictor = Arc::new(predictor);
        *slot = Some(Arc::clone(&predictor));
        Ok(predictor)
    }

    /// Run one inference call end to end: resolve, lazily load, predict and
    /// normalize into the versioned result document.
    pub fn predict(
        &self,
        model_id: &str,
        image: &RgbImage,
    ) -> Result<(RgbImage, InferenceResult)> {
        // rejects unknown models before any compute
        let task = self.task_of(model_id)?;
        let predictor = self.ensure_loaded(model_id)?;

        let (width, height) = image.dimensions();
        let Prediction {
            detections,
            overlay,
            time_ms,
        } = predictor.predict(image)?;

        let result = build_result(task, model_id, detections, width, height, time_ms, &self.policy);
        Ok((overlay, result))
    }
}

/// Per-task parameter bundle for the default catalog.
#[derive(Debug, Clone, Default)]
pub struct CatalogParams {
    pub detection: DetectionParams,
    pub instance: InstanceSegParams,
    pub semantic: SemanticSegParams,
}

/// Build the registry with the service's model catalog: a box detector plus
/// the two segmentation models, every entry lazy, weights resolved under
/// `model_dir`.
pub fn default_registry(
    model_dir: &Path,
    device: &str,
    params: CatalogParams,
    policy: SizePolicy,
) -> ModelRegistry {
    let selection = determine_optimal_device(device);
    log::debug!("🖥️  Device: {} ({})", selection.device, selection.reason);
    let device = selection.device;

    let mut builder = ModelRegistry::builder().size_policy(policy);

    {
        let weights = model_dir.join("polyp_yolo.onnx");
        let device = device.to_string();
        let detection_params = params.detection.clone();
        builder = builder.register("default", TaskKind::Detection, move || {
            let session =
                create_onnx_session("default", &weights, &SessionConfig { device: &device })?;
            Ok(TaskPredictor::Detection(BoxPredictor::new(
                Box::new(OnnxBoxModel::new(session)),
                detection_params.clone(),
            )))
        });
    }

    {
        let weights = model_dir.join("maskrcnn_polyp.onnx");
        let device = device.to_string();
        let instance_params = params.instance.clone();
        builder = builder.register("maskrcnn", TaskKind::SegmentationInstance, move || {
            let session =
                create_onnx_session("maskrcnn", &weights, &SessionConfig { device: &device })?;
            Ok(TaskPredictor::SegmentationInstance(
                InstanceSegPredictor::new(Box::new(OnnxInstanceModel::new(session)), instance_params.clone()),
            ))
        });
    }

    {
        let weights = model_dir.join("unet_effb7.onnx");
        let device = device.to_string();
        let semantic_params = params.semantic.clone();
        builder = builder.register("unet", TaskKind::SegmentationSemantic, move || {
            let session =
                create_onnx_session("unet", &weights, &SessionConfig { device: &device })?;
            Ok(TaskPredictor::SegmentationSemantic(
                SemanticSegPredictor::new(Box::new(OnnxDenseModel::new(session)), semantic_params.clone()),
            ))
        });
    }

    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockBoxModel;

    fn mock_box_predictor() -> TaskPredictor {
        TaskPredictor::Detection(BoxPredictor::new(
            Box::new(MockBoxModel {
                xyxy: vec![],
                scores: vec![],
                class_ids: vec![],
                masks: None,
            }),
            DetectionParams::default(),
        ))
    }

    #[test]
    fn test_unknown_model_is_rejected() {
        let registry = ModelRegistry::builder().build();
        let err = registry.task_of("nope").unwrap_err();
        assert!(matches!(err, EndoscanError::UnknownModel { .. }));
    }

    #[test]
    fn test_resolve_reports_unloaded_handle() {
        let registry = ModelRegistry::builder()
            .register("default", TaskKind::Detection, || Ok(mock_box_predictor()))
            .build();
        let (task, handle) = registry.resolve("default").unwrap();
        assert_eq!(task, TaskKind::Detection);
        assert!(handle.is_none());
        assert!(!registry.is_loaded("default"));
    }

    #[test]
    fn test_ensure_loaded_is_idempotent() {
        let registry = ModelRegistry::builder()
            .register("default", TaskKind::Detection, || Ok(mock_box_predictor()))
            .build();
        let first = registry.ensure_loaded("default").unwrap();
        let second = registry.ensure_loaded("default").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(registry.is_loaded("default"));
    }

    #[test]
    fn test_task_mismatch_is_unsupported_task() {
        let registry = ModelRegistry::builder()
            .register("default", TaskKind::SegmentationSemantic, || {
                Ok(mock_box_predictor())
            })
            .build();
        let err = registry.ensure_loaded("default").unwrap_err();
        assert!(matches!(err, EndoscanError::UnsupportedTask { .. }));
    }

    #[test]
    fn test_default_catalog_entries() {
        let registry = default_registry(
            Path::new("./models"),
            "cpu",
            CatalogParams::default(),
            SizePolicy::default(),
        );
        let models = registry.models();
        let ids: Vec<&str> = models.iter().map(|m| m.model_id.as_str()).collect();
        assert_eq!(ids, vec!["default", "maskrcnn", "unet"]);
        assert!(models.iter().all(|m| !m.loaded));
    }

    #[test]
    fn test_missing_weights_surface_as_model_load_error() {
        let registry = default_registry(
            Path::new("/nonexistent"),
            "cpu",
            CatalogParams::default(),
            SizePolicy::default(),
        );
        let err = registry.ensure_loaded("unet").unwrap_err();
        assert!(matches!(err, EndoscanError::ModelLoad { .. }));
        // the failed load leaves the entry unloaded and retryable
        assert!(!registry.is_loaded("unet"));
    }
}
