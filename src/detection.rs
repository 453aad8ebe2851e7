use std::fmt;

use image::RgbImage;
use serde::Serialize;

use crate::summary::StageTimings;

/// Version tag on every persisted result payload. Incremented whenever a
/// field change breaks backward compatibility for stored documents.
pub const RESULT_SCHEMA_VERSION: u32 = 2;

/// The deployed domain has a single lesion class. Models may carry
/// placeholder or multi-class label tables from training; the predictors
/// override them with this label.
pub const LESION_CLASS_NAME: &str = "polyp";

/// The three model output shapes the service knows how to normalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Detection,
    SegmentationInstance,
    SegmentationSemantic,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Detection => "detection",
            TaskKind::SegmentationInstance => "segmentation_instance",
            TaskKind::SegmentationSemantic => "segmentation_semantic",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lesion found in one image.
///
/// `detection_id` is positional (box list order or component label order)
/// and unique within a single inference call only. Box-shaped and
/// mask-shaped fields are mutually exclusive by task, except that a box
/// detector emitting per-instance masks carries both groups.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub detection_id: usize,
    pub class_id: i64,
    pub class_name: String,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_xyxy: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_xywh: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_area_px: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_xyxy_norm: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox_xywh_norm: Option<[f32; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_area_px: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask_polygons: Option<Vec<Vec<f32>>>,
}

impl Detection {
    /// Build a box-task detection from corner coordinates in original-image
    /// pixels, deriving the center form, normalized variants and aspect
    /// ratio. The class label is forced to the domain label.
    pub fn from_box(
        detection_id: usize,
        class_id: i64,
        confidence: f32,
        xyxy: [f32; 4],
        img_width: u32,
        img_height: u32,
    ) -> Self {
        let [x1, y1, x2, y2] = xyxy;
        let w = x2 - x1;
        let h = y2 - y1;
        let xywh = [x1 + w / 2.0, y1 + h / 2.0, w, h];
        let wf = img_width as f32;
        let hf = img_height as f32;
        Self {
            detection_id,
            class_id,
            class_name: LESION_CLASS_NAME.to_string(),
            confidence,
            bbox_xyxy: Some(xyxy),
            bbox_xywh: Some(xywh),
            bbox_area_px: Some(round2((w * h) as f64)),
            bbox_xyxy_norm: Some([x1 / wf, y1 / hf, x2 / wf, y2 / hf]),
            bbox_xywh_norm: Some([xywh[0] / wf, xywh[1] / hf, w / wf, h / hf]),
            aspect_ratio: if h > 0.0 { Some(round4(w / h)) } else { None },
            mask_area_px: None,
            mask_polygons: None,
        }
    }

    /// Build a mask-task detection from pixel area and polygon outlines in
    /// original-image coordinates.
    pub fn from_mask(
        detection_id: usize,
        class_id: i64,
        confidence: f32,
        mask_area_px: u64,
        mask_polygons: Vec<Vec<f32>>,
    ) -> Self {
        Self {
            detection_id,
            class_id,
            class_name: LESION_CLASS_NAME.to_string(),
            confidence,
            bbox_xyxy: None,
            bbox_xywh: None,
            bbox_area_px: None,
            bbox_xyxy_norm: None,
            bbox_xywh_norm: None,
            aspect_ratio: None,
            mask_area_px: Some(mask_area_px),
            mask_polygons: Some(mask_polygons),
        }
    }

    /// Attach instance-mask geometry to a box detection.
    pub fn attach_mask(&mut self, mask_area_px: u64, mask_polygons: Vec<Vec<f32>>) {
        self.mask_area_px = Some(mask_area_px);
        self.mask_polygons = Some(mask_polygons);
    }

    /// Pixel area used for clinical coverage metrics: mask area when
    /// available, otherwise box area.
    pub fn area_px(&self) -> Option<f64> {
        self.mask_area_px.map(|a| a as f64).or(self.bbox_area_px)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round4(v: f32) -> f32 {
    (v * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultMeta {
    pub task: TaskKind,
    pub model_name: String,
}

/// The unified result document, created once per upload/model pair and
/// persisted verbatim by the caller. Never mutated after construction.
#[derive(Debug, Clone, Serialize)]
pub struct InferenceResult {
    pub schema: u32,
    pub result_meta: ResultMeta,
    pub detections: Vec<Detection>,
    pub summary: crate::summary::ResultSummary,
}

/// Raw predictor output before summary assembly: detections in
/// original-image coordinates, the rendered overlay, and per-stage timings.
pub struct Prediction {
    pub detections: Vec<Detection>,
    pub overlay: RgbImage,
    pub time_ms: StageTimings,
}
