//! Semantic-segmentation predictor: the only pipeline that must derive
//! lesion instances from a non-instance-aware dense probability map.
//!
//! Component counts are sensitive to every step here (smoothing, threshold,
//! morphology, connectivity), so the configuration is explicit and the
//! reference behavior is pinned by tests.

use std::time::Instant;

use image::{imageops, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{close, open};
use ndarray::{Array3, Array4, ArrayView4, Axis, Ix4};
use ort::session::Session;
use ort::value::TensorRef;
use parking_lot::Mutex;
use serde::Serialize;

use crate::detection::{Detection, Prediction};
use crate::error::{EndoscanError, Result};
use crate::geometry::{
    component_mask, label_components, mask_area, mask_to_polygons, resize_probabilities,
    threshold_probabilities, ProbMap,
};
use crate::overlay::{render_mask_overlay, OverlayStyle};
use crate::summary::{elapsed_ms, StageTimings};

/// Channel-wise normalization expected by the model's encoder. Different
/// backbones need different statistics, so this is configuration data, not
/// a constant.
#[derive(Debug, Clone, Serialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Default for Normalization {
    fn default() -> Self {
        // ImageNet statistics, the common default for pretrained encoders
        Self {
            mean: [0.485, 0.456, 0.406],
            std: [0.229, 0.224, 0.225],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticSegParams {
    pub input_size: u32,
    /// Probability cutoff when binarizing the dense map.
    pub threshold: f32,
    /// Channel to select after softmax for multi-channel heads.
    pub class_index: usize,
    /// Gaussian sigma applied to the probability map; 0 disables smoothing.
    pub smooth_sigma: f32,
    /// Open/close kernel size; values below 3 disable morphology.
    pub morph_kernel: u32,
    /// Components below this percentage of total image pixels are dropped
    /// (floor of one pixel).
    pub min_area_pct: f64,
    pub normalization: Normalization,
}

impl Default for SemanticSegParams {
    fn default() -> Self {
        Self {
            input_size: 256,
            threshold: 0.75,
            class_index: 0,
            smooth_sigma: 1.0,
            morph_kernel: 3,
            min_area_pct: 0.05,
            normalization: Normalization::default(),
        }
    }
}

/// Black-box boundary for dense models: an image tensor in, a raw
/// `(channels, h, w)` score map out. Single-channel maps are taken as
/// logits; multi-channel maps as pre-softmax class scores.
pub trait DenseScoreModel: Send + Sync {
    fn infer(&self, input: ArrayView4<f32>) -> Result<Array3<f32>>;
}

/// ONNX dense-segmentation model (U-Net style export).
pub struct OnnxDenseModel {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
}

impl OnnxDenseModel {
    pub fn new(session: Session) -> Self {
        Self::with_io(session, "input", "output")
    }

    pub fn with_io(session: Session, input_name: &str, output_name: &str) -> Self {
        Self {
            session: Mutex::new(session),
            input_name: input_name.to_string(),
            output_name: output_name.to_string(),
        }
    }
}

impl DenseScoreModel for OnnxDenseModel {
    fn infer(&self, input: ArrayView4<f32>) -> Result<Array3<f32>> {
        let mut session = self.session.lock();
        let outputs = session.run(
            ort::inputs![self.input_name.as_str() => TensorRef::from_array_view(&input.as_standard_layout())?],
        )?;
        // 1 x C x h x w
        let scores = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned();
        Ok(scores.index_axis(Axis(0), 0).to_owned())
    }
}

/// Resize (bilinear), scale to `[0,1]` and apply encoder normalization.
fn preprocess(image: &RgbImage, target_size: u32, normalization: &Normalization) -> Array4<f32> {
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
            let value = pixel[c] as f32 / 255.0;
            input[[0, c, y as usize, x as usize]] =
                (value - normalization.mean[c]) / normalization.std[c];
        }
    }
    input
}

/// Collapse the raw score map into a single-channel probability map:
/// logistic transform for one channel, channel-wise softmax and class
/// selection otherwise.
fn scores_to_probabilities(scores: &Array3<f32>, class_index: usize) -> Result<ProbMap> {
    let channels = scores.shape()[0];
    let height = scores.shape()[1];
    let width = scores.shape()[2];

    if channels == 0 {
        return Err(EndoscanError::Inference {
            operation: "dense model output has no channels".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "empty score map",
            )),
        });
    }
    if channels > 1 && class_index >= channels {
        return Err(EndoscanError::Inference {
            operation: format!(
                "class index {class_index} out of range for {channels}-channel output"
            ),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "class_index out of range",
            )),
        });
    }

    let map = ProbMap::from_fn(width as u32, height as u32, |x, y| {
        let (xi, yi) = (x as usize, y as usize);
        let p = if channels == 1 {
            let v = scores[[0, yi, xi]];
            1.0 / (1.0 + (-v).exp())
        } else {
            let max = (0..channels)
                .map(|c| scores[[c, yi, xi]])
                .fold(f32::NEG_INFINITY, f32::max);
            let denom: f32 = (0..channels)
                .map(|c| (scores[[c, yi, xi]] - max).exp())
                .sum();
            (scores[[class_index, yi, xi]] - max).exp() / denom
        };
        Luma([p])
    });
    Ok(map)
}

pub struct SemanticSegPredictor {
    model: Box<dyn DenseScoreModel>,
    params: SemanticSegParams,
    style: OverlayStyle,
}

impl SemanticSegPredictor {
    pub fn new(model: Box<dyn DenseScoreModel>, params: SemanticSegParams) -> Self {
        Self {
            model,
            params,
            style: OverlayStyle::semantic(),
        }
    }

    pub fn predict(&self, image: &RgbImage) -> Result<Prediction> {
        let (orig_width, orig_height) = image.dimensions();
        let mut time_ms = StageTimings::new();

        let start = Instant::now();
        let tensor = preprocess(image, self.params.input_size, &self.params.normalization);
        time_ms.insert("preprocess".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let scores = self.model.infer(tensor.view())?;
        time_ms.insert("inference".to_string(), elapsed_ms(start));

        let start = Instant::now();
        let probs_small = scores_to_probabilities(&scores, self.params.class_index)?;
        let mut probs = resize_probabilities(&probs_small, orig_width, orig_height);

        if self.params.smooth_sigma > 0.0 {
            probs = gaussian_blur_f32(&probs, self.params.smooth_sigma);
        }

        let mut mask = threshold_probabilities(&probs, self.params.threshold);

        // open before close: first remove speckles, then fill small holes
        if self.params.morph_kernel >= 3 {
            let radius = (self.params.morph_kernel / 2) as u8;
            mask = close(&open(&mask, Norm::L1, radius), Norm::L1, radius);
        }

        let (labels, component_count) = label_components(&mask);
        let total_px = orig_width as u64 * orig_height as u64;
        let min_area =
            (((self.params.min_area_pct / 100.0) * total_px as f64) as u64).max(1);

        let mut detections = Vec::new();
        for label in 1..=component_count {
            let region = component_mask(&labels, label);
            let area = mask_area(&region);
            if area < min_area {
                continue;
            }

            let mut prob_sum = 0.0f64;
            for (p, m) in probs.pixels().zip(region.pixels()) {
                if m[0] != 0 {
                    prob_sum += p[0] as f64;
                }
            }
            let confidence = (prob_sum / area as f64) as f32;

            detections.push(Detection::from_mask(
                detections.len(),
                0,
                confidence,
                area,
                mask_to_polygons(&region),
            ));
        }

        // the overlay shows the full thresholded mask; the detection list
        // additionally applies the min-area filter
        let overlay = render_mask_overlay(image, &mask, &self.style);
        time_ms.insert("postprocess".to_string(), elapsed_ms(start));

        Ok(Prediction {
            detections,
            overlay,
            time_ms,
        })
    }
}
