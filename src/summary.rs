//! Result summary aggregation and the derived clinical view.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;

use crate::detection::{Detection, InferenceResult, ResultMeta, TaskKind, RESULT_SCHEMA_VERSION};

/// Per-stage wall-clock timings in milliseconds.
pub type StageTimings = BTreeMap<String, f64>;

pub fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

/// Three-bin lesion size category derived from image coverage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Diminutive,
    Small,
    Large,
    Unknown,
}

/// Coverage thresholds for size classification.
///
/// These are a heuristic proxy for physical lesion diameter, kept as data
/// rather than constants so deployments can recalibrate. The mapping is
/// part of the persisted schema: changing the defaults requires bumping
/// `RESULT_SCHEMA_VERSION`.
#[derive(Debug, Clone, Serialize)]
pub struct SizePolicy {
    /// Below this coverage percentage a lesion is diminutive.
    pub small_max_pct: f64,
    /// At or above this coverage percentage a lesion is large.
    pub large_min_pct: f64,
}

impl Default for SizePolicy {
    fn default() -> Self {
        Self {
            small_max_pct: 2.0,
            large_min_pct: 6.0,
        }
    }
}

impl SizePolicy {
    pub fn classify(&self, area_pct: Option<f64>) -> SizeClass {
        match area_pct {
            None => SizeClass::Unknown,
            Some(p) if p < self.small_max_pct => SizeClass::Diminutive,
            Some(p) if p < self.large_min_pct => SizeClass::Small,
            Some(_) => SizeClass::Large,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LesionAssessment {
    pub id: usize,
    pub confidence: f32,
    pub size_class: SizeClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClinicalSummary {
    pub polyp_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub largest_lesion_area_pct: Option<f64>,
    pub lesions: Vec<LesionAssessment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultSummary {
    pub num_detections: usize,
    pub class_counts: BTreeMap<String, u64>,
    pub confidence_mean: f32,
    pub confidence_max: f32,
    pub image_size: ImageSize,
    pub time_ms: StageTimings,
    pub clinical: ClinicalSummary,
}

/// Aggregate detections into the summary block.
///
/// Pure function; never mutates its inputs. An empty detection list yields
/// `confidence_mean == confidence_max == 0.0` (never NaN), so callers do
/// not special-case empty results.
pub fn build_summary(
    detections: &[Detection],
    width: u32,
    height: u32,
    time_ms: StageTimings,
    policy: &SizePolicy,
) -> ResultSummary {
    let mut class_counts: BTreeMap<String, u64> = BTreeMap::new();
    for det in detections {
        *class_counts.entry(det.class_name.clone()).or_insert(0) += 1;
    }

    let confidence_mean = if detections.is_empty() {
        0.0
    } else {
        detections.iter().map(|d| d.confidence).sum::<f32>() / detections.len() as f32
    };
    let confidence_max = detections
        .iter()
        .map(|d| d.confidence)
        .fold(0.0f32, f32::max);

    let total_px = width as f64 * height as f64;
    let lesions: Vec<LesionAssessment> = detections
        .iter()
        .map(|det| {
            let area_pct = if total_px > 0.0 {
                det.area_px().map(|a| a / total_px * 100.0)
            } else {
                None
            };
            LesionAssessment {
                id: det.detection_id,
                confidence: det.confidence,
                size_class: policy.classify(area_pct),
                area_pct,
            }
        })
        .collect();

    let largest_lesion_area_pct = lesions
        .iter()
        .filter_map(|l| l.area_pct)
        .fold(None, |acc: Option<f64>, p| {
            Some(acc.map_or(p, |m| m.max(p)))
        });

    ResultSummary {
        num_detections: detections.len(),
        class_counts,
        confidence_mean,
        confidence_max,
        image_size: ImageSize { width, height },
        time_ms,
        clinical: ClinicalSummary {
            polyp_count: detections.len(),
            largest_lesion_area_pct,
            lesions,
        },
    }
}

/// Wrap detections into the versioned result document.
pub fn build_result(
    task: TaskKind,
    model_name: &str,
    detections: Vec<Detection>,
    width: u32,
    height: u32,
    time_ms: StageTimings,
    policy: &SizePolicy,
) -> InferenceResult {
    let summary = build_summary(&detections, width, height, time_ms, policy);
    InferenceResult {
        schema: RESULT_SCHEMA_VERSION,
        result_meta: ResultMeta {
            task,
            model_name: model_name.to_string(),
        },
        detections,
        summary,
    }
}
