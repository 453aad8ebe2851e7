//! Instance-segmentation predictor: score filtering, mask binarization and
//! per-instance geometry extraction.
//!
//! This is a filter+resize pipeline, not a learned decision: the thresholds
//! are tunable configuration.

use std::time::Instant;

use image::{imageops, GrayImage, Luma, RgbImage};
use ndarray::{Array2, Array4, ArrayView4, Axis, Ix1, Ix4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde::Serialize;

use crate::detection::{Detection, Prediction};
use crate::error::Result;
use crate::geometry::{binarize, mask_area, mask_to_polygons, resize_mask_nearest, FOREGROUND};
use crate::overlay::{render_mask_overlay, OverlayStyle};
use crate::summary::{elapsed_ms, StageTimings};

#[derive(Debug, Clone, Serialize)]
pub struct InstanceSegParams {
    pub input_size: u32,
    /// Candidate instances below this score are discarded.
    pub score_threshold: f32,
    /// Per-pixel probability cutoff when binarizing each kept mask.
    pub mask_binarize_threshold: f32,
}

impl Default for InstanceSegParams {
    fn default() -> Self {
        Self {
            input_size: 256,
            score_threshold: 0.75,
            mask_binarize_threshold: 0.5,
        }
    }
}

/// Raw output of an instance-segmentation model: per-candidate score, label
/// and dense probability mask at model resolution.
#[derive(Debug, Clone)]
pub struct RawInstances {
    pub scores: Vec<f32>,
    pub labels: Vec<i64>,
    pub masks: Vec<Array2<f32>>,
}

pub trait InstanceMaskModel: Send + Sync {
    fn infer(&self, input: ArrayView4<f32>) -> Result<RawInstances>;
}

/// ONNX instance-segmentation model (Mask R-CNN style export).
pub struct OnnxInstanceModel {
    session: Mutex<Session>,
    input_name: String,
    score_output: String,
    label_output: String,
    mask_output: String,
}

impl OnnxInstanceModel {
    pub fn new(session: Session) -> Self {
        Self::with_io(session, "images", "scores", "labels", "masks")
    }

    pub fn with_io(
        session: Session,
        input_name: &str,
        score_output: &str,
        label_output: &str,
        mask_output: &str,
    ) -> Self {
        Self {
            session: Mutex::new(session),
            input_name: input_name.to_string(),
            score_output: score_output.to_string(),
            label_output: label_output.to_string(),
            mask_output: mask_output.to_string(),
        }
    }
}

impl InstanceMaskModel for OnnxInstanceModel {
    fn infer(&self, input: ArrayView4<f32>) -> Result<RawInstances> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&input.as_standard_layout())?],
        )?;

        let scores = outputs[self.score_output.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix1>()?
            .to_vec();
        let labels = outputs[self.label_output.as_str()]
            .try_extract_array::<i64>()?
            .into_dimensionality::<Ix1>()?
            .to_vec();
        // N x 1 x h x w
        let mask_tensor = outputs[self.mask_output.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        let masks = (0..mask_tensor.shape()[0])
            .map(|i| {
                mask_tensor
                    .index_axis(Axis(0), i)
                    .index_axis(Axis(0), 0)
                    .to_owned()
            })
            .collect();

        Ok(RawInstances {
            scores,
            labels,
            masks,
        })
    }
}

/// Resize to the model resolution (bilinear) and convert to a `[0,1]` NCHW
/// tensor.
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

pub struct InstanceSegPredictor {
    model: Box<dyn InstanceMaskModel>,
    params: InstanceSegParams,
    style: OverlayStyle,
}

impl InstanceSegPredictor {
    pub fn new(model: Box<dyn InstanceMaskModel>, params: InstanceSegParams) -> Self {
        Self {
            model,
            params,
            style: OverlayStyle::instance(),
        }
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Prediction> {
        let (orig_width, orig_height) = image.dimensions();
        let mut time_ms = StageTimings::new();

        let start = Instant::now();
        let tensor = preprocess(image, self.params.input_size);
        time_ms.insert("preprocess".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let raw = self.model.infer(tensor.view())?;
        time_ms.insert("inference".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let mut detections = Vec::new();
        let mut union_mask = GrayImage::new(orig_width, orig_height);

        for (i, &score) in raw.scores.iter().enumerate() {
            if score < self.params.score_threshold {
                continue;
            }
            let Some(mask) = raw.masks.get(i) else {
                continue;
            };

            let binary = binarize(mask, self.params.mask_binarize_threshold);
            let upscaled = resize_mask_nearest(&binary, orig_width, orig_height);
            let area = mask_area(&upscaled);
            // masks that vanish after upscaling carry no geometry
            if area == 0 {
                continue;
            }

            for (acc, px) in union_mask.pixels_mut().zip(upscaled.pixels()) {
                if px[0] != 0 {
                    *acc = Luma([FOREGROUND]);
                }
            }

            let class_id = raw.labels.get(i).copied().unwrap_or(0);
            detections.push(Detection::from_mask(
                detections.len(),
                class_id,
                score,
                area,
                mask_to_polygons(&upscaled),
            ));
        }

        let overlay = render_mask_overlay(image, &union_mask, &self.style);
        time_ms.insert("postprocess".to_string(), elapsed_ms(start));

        Ok(Prediction {
            detections,
            overlay,
            time_ms,
        })
    }
}
