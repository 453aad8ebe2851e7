//! Box-task predictor: preprocessing, YOLO-style head decoding and
//! normalization into the unified detection schema.

use std::time::Instant;

use image::{imageops, RgbImage};
use ndarray::{Array2, Array3, Array4, ArrayView4, Ix3};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde::Serialize;

use crate::detection::{Detection, Prediction};
use crate::error::Result;
use crate::geometry::{binarize, mask_area, mask_to_polygons, resize_mask_nearest};
use crate::overlay::render_box_overlay;
use crate::summary::{elapsed_ms, StageTimings};

/// Box detector configuration. The confidence and IoU thresholds belong to
/// the model ("its own thresholds"); downstream layers never re-filter.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionParams {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    /// Binarization threshold for per-instance masks emitted by
    /// segmentation-capable detectors.
    pub mask_binarize_threshold: f32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            mask_binarize_threshold: 0.5,
        }
    }
}

/// Raw output of a box-task model, in model-input pixel coordinates.
#[derive(Debug, Clone)]
pub struct RawBoxes {
    pub xyxy: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub class_ids: Vec<i64>,
    /// Optional per-instance probability masks at model resolution. Index i
    /// must correspond to box i; the predictor validates the lengths match
    /// before attaching and skips attachment otherwise.
    pub masks: Option<Vec<Array2<f32>>>,
}

/// Black-box boundary for box detectors: an image tensor in, decoded raw
/// boxes out.
pub trait BoxModel: Send + Sync {
    fn infer(&self, input: ArrayView4<f32>, params: &DetectionParams) -> Result<RawBoxes>;
}

/// ONNX box detector decoding the `[1, 4+nc, N]` YOLO head.
pub struct OnnxBoxModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxBoxModel {
    pub fn new(session: Session) -> Self {
        Self::with_io(session, "images", "output0")
    }

    pub fn with_io(session: Session, input_name: &str, output_name: &str) -> Self {
        Self {
            session: Mutex::new(session),
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
        }
    }
}

impl BoxModel for OnnxBoxModel {
    fn infer(&self, input: ArrayView4<f32>, params: &DetectionParams) -> Result<RawBoxes> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&input.as_standard_layout())?],
        )?;
        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix3>()?
            .to_owned();
        Ok(decode_yolo_output(&output, params))
    }
}

struct Candidate {
    xyxy: [f32; 4],
    score: f32,
    class_id: i64,
}

/// Decode a `[1, 4+nc, N]` detection head: center/size rows first, then one
/// score row per class. Applies the confidence threshold, class-wise NMS
/// and sorts by descending confidence.
fn decode_yolo_output(output: &Array3<f32>, params: &DetectionParams) -> RawBoxes {
    let shape = output.shape();
    let num_classes = shape[1].saturating_sub(4);
    let num_boxes = shape[2];

    let mut candidates = Vec::new();
    for i in 0..num_boxes {
        let x_center = output[[0, 0, i]];
        let y_center = output[[0, 1, i]];
        let width = output[[0, 2, i]];
        let height = output[[0, 3, i]];

        let mut best_score = 0.0f32;
        let mut best_class = 0usize;
        for class_idx in 0..num_classes {
            let score = output[[0, 4 + class_idx, i]];
            if score > best_score {
                best_score = score;
                best_class = class_idx;
            }
        }

        if best_score > params.confidence_threshold {
            candidates.push(Candidate {
                xyxy: [
                    x_center - width / 2.0,
                    y_center - height / 2.0,
                    x_center + width / 2.0,
                    y_center + height / 2.0,
                ],
                score: best_score,
                class_id: best_class as i64,
            });
        }
    }

    let mut kept = nms(candidates, params.iou_threshold);
    kept.sort_by(|a, b| b.score.total_cmp(&a.score));

    RawBoxes {
        xyxy: kept.iter().map(|c| c.xyxy).collect(),
        scores: kept.iter().map(|c| c.score).collect(),
        class_ids: kept.iter().map(|c| c.class_id).collect(),
        masks: None,
    }
}

/// Non-maximum suppression, applied separately per class.
fn nms(candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    use std::collections::HashMap;

    let mut class_groups: HashMap<i64, Vec<Candidate>> = HashMap::new();
    for candidate in candidates {
        class_groups
            .entry(candidate.class_id)
            .or_default()
            .push(candidate);
    }

    let mut all_results = Vec::new();
    for (_, mut group) in class_groups {
        group.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut suppressed = vec![false; group.len()];
        for i in 0..group.len() {
            if suppressed[i] {
                continue;
            }
            for j in (i + 1)..group.len() {
                if !suppressed[j] && iou(&group[i].xyxy, &group[j].xyxy) > iou_threshold {
                    suppressed[j] = true;
                }
            }
        }

        all_results.extend(
            group
                .into_iter()
                .zip(suppressed)
                .filter(|(_, s)| !s)
                .map(|(c, _)| c),
        );
    }

    all_results
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Resize to the model resolution and convert to a `[0,1]` NCHW tensor.
fn preprocess(image: &RgbImage, target_size: u32) -> Array4<f32> {
    let resized = imageops::resize(
        image,
        target_size,
        target_size,
        imageops::FilterType::Triangle,
    );
    let size = target_size as usize;
    let mut input = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    input
}

pub struct BoxPredictor {
    model: Box<dyn BoxModel>,
    params: DetectionParams,
}

impl BoxPredictor {
    pub fn new(model: Box<dyn BoxModel>, params: DetectionParams) -> Self {
        Self { model, params }
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Prediction> {
        let (orig_width, orig_height) = image.dimensions();
        let mut time_ms = StageTimings::new();

        let start = Instant::now();
        let tensor = preprocess(image, self.params.input_size);
        time_ms.insert("preprocess".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let raw = self.model.infer(tensor.view(), &self.params)?;
        time_ms.insert("inference".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let scale_x = orig_width as f32 / self.params.input_size as f32;
        let scale_y = orig_height as f32 / self.params.input_size as f32;

        let mut detections: Vec<Detection> = raw
            .xyxy
            .iter()
            .enumerate()
            .map(|(i, bbox)| {
                let scaled = [
                    bbox[0] * scale_x,
                    bbox[1] * scale_y,
                    bbox[2] * scale_x,
                    bbox[3] * scale_y,
                ];
                Detection::from_box(i, raw.class_ids[i], raw.scores[i], scaled, orig_width, orig_height)
            })
            .collect();

        if let Some(masks) = &raw.masks {
            if masks.len() == detections.len() {
                for (detection, mask) in detections.iter_mut().zip(masks) {
                    let binary = binarize(mask, self.params.mask_binarize_threshold);
                    let upscaled = resize_mask_nearest(&binary, orig_width, orig_height);
                    detection.attach_mask(mask_area(&upscaled), mask_to_polygons(&upscaled));
                }
            } else {
                log::warn!(
                    "⚠️  Detector returned {} mask(s) for {} box(es); skipping mask attachment",
                    masks.len(),
                    detections.len()
                );
            }
        }

        let overlay = render_box_overlay(image, &detections);
        time_ms.insert("postprocess".to_string(), elapsed_ms(start));

        Ok(Prediction {
            detections,
            overlay,
            time_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockBoxModel;
    use ndarray::Array2;

    fn test_image(w: u32, h: u32) -> RgbImage {
        RgbImage::from_pixel(w, h, image::Rgb([40, 40, 40]))
    }

    #[test]
    fn test_boxes_are_scaled_to_original_coordinates() {
        // model space is 640x640, image is 1280x640 -> x doubles, y stays
        let model = MockBoxModel {
            xyxy: vec![[100.0, 100.0, 200.0, 200.0]],
            scores: vec![0.9],
            class_ids: vec![0],
            masks: None,
        };
        let predictor = BoxPredictor::new(Box::new(model), DetectionParams::default());
        let prediction = predictor.predict(&test_image(1280, 640)).unwrap();

        assert_eq!(prediction.detections.len(), 1);
        let det = &prediction.detections[0];
        assert_eq!(det.bbox_xyxy, Some([200.0, 100.0, 400.0, 200.0]));
        assert_eq!(det.bbox_xywh, Some([300.0, 150.0, 200.0, 100.0]));
        assert_eq!(det.aspect_ratio, Some(2.0));
        assert_eq!(det.confidence, 0.9);
    }

    #[test]
    fn test_class_label_is_forced_to_domain_label() {
        let model = MockBoxModel {
            xyxy: vec![[0.0, 0.0, 10.0, 10.0]],
            scores: vec![0.5],
            class_ids: vec![7],
            masks: None,
        };
        let predictor = BoxPredictor::new(Box::new(model), DetectionParams::default());
        let prediction = predictor.predict(&test_image(640, 640)).unwrap();
        assert_eq!(prediction.detections[0].class_name, "polyp");
        assert_eq!(prediction.detections[0].class_id, 7);
    }

    #[test]
    fn test_mask_attachment_by_position() {
        let mut mask = Array2::<f32>::zeros((640, 640));
        for y in 100..200 {
            for x in 100..200 {
                mask[[y, x]] = 0.9;
            }
        }
        let model = MockBoxModel {
            xyxy: vec![[100.0, 100.0, 200.0, 200.0]],
            scores: vec![0.9],
            class_ids: vec![0],
            masks: Some(vec![mask]),
        };
        let predictor = BoxPredictor::new(Box::new(model), DetectionParams::default());
        let prediction = predictor.predict(&test_image(640, 640)).unwrap();

        let det = &prediction.detections[0];
        assert_eq!(det.mask_area_px, Some(100 * 100));
        assert_eq!(det.mask_polygons.as_ref().unwrap().len(), 1);
        assert!(det.bbox_xyxy.is_some());
    }

    #[test]
    fn test_mask_attachment_skipped_on_count_mismatch() {
        let model = MockBoxModel {
            xyxy: vec![[0.0, 0.0, 50.0, 50.0], [100.0, 100.0, 150.0, 150.0]],
            scores: vec![0.9, 0.8],
            class_ids: vec![0, 0],
            masks: Some(vec![Array2::<f32>::zeros((640, 640))]),
        };
        let predictor = BoxPredictor::new(Box::new(model), DetectionParams::default());
        let prediction = predictor.predict(&test_image(640, 640)).unwrap();

        assert_eq!(prediction.detections.len(), 2);
        assert!(prediction.detections.iter().all(|d| d.mask_area_px.is_none()));
    }

    #[test]
    fn test_empty_model_output_is_valid_empty_prediction() {
        let model = MockBoxModel {
            xyxy: vec![],
            scores: vec![],
            class_ids: vec![],
            masks: None,
        };
        let predictor = BoxPredictor::new(Box::new(model), DetectionParams::default());
        let prediction = predictor.predict(&test_image(640, 640)).unwrap();
        assert!(prediction.detections.is_empty());
    }

    #[test]
    fn test_decode_applies_confidence_threshold_and_nms() {
        // head layout [1, 5, 3]: one class, three candidate boxes; two of
        // them overlap heavily, one is below threshold
        let mut output = Array3::<f32>::zeros((1, 5, 3));
        // box 0: strong
        output[[0, 0, 0]] = 100.0;
        output[[0, 1, 0]] = 100.0;
        output[[0, 2, 0]] = 50.0;
        output[[0, 3, 0]] = 50.0;
        output[[0, 4, 0]] = 0.9;
        // box 1: overlaps box 0, weaker
        output[[0, 0, 1]] = 102.0;
        output[[0, 1, 1]] = 102.0;
        output[[0, 2, 1]] = 50.0;
        output[[0, 3, 1]] = 50.0;
        output[[0, 4, 1]] = 0.6;
        // box 2: below threshold
        output[[0, 0, 2]] = 400.0;
        output[[0, 1, 2]] = 400.0;
        output[[0, 2, 2]] = 40.0;
        output[[0, 3, 2]] = 40.0;
        output[[0, 4, 2]] = 0.1;

        let raw = decode_yolo_output(&output, &DetectionParams::default());
        assert_eq!(raw.xyxy.len(), 1);
        assert_eq!(raw.scores[0], 0.9);
    }

    #[test]
    fn test_iou_disjoint_boxes() {
        assert_eq!(iou(&[0.0, 0.0, 10.0, 10.0], &[20.0, 20.0, 30.0, 30.0]), 0.0);
        let full = iou(&[0.0, 0.0, 10.0, 10.0], &[0.0, 0.0, 10.0, 10.0]);
        assert!((full - 1.0).abs() < 1e-6);
    }
}
