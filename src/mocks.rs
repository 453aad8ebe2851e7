//! Stub models for every task trait, used by unit and integration tests in
//! place of real ONNX sessions.

use ndarray::{Array2, Array3, ArrayView4, Axis};

use crate::box_detection::{BoxModel, DetectionParams, RawBoxes};
use crate::error::Result;
use crate::instance_segmentation::{InstanceMaskModel, RawInstances};
use crate::semantic_segmentation::DenseScoreModel;

/// Box model returning a fixed raw detection set.
#[derive(Debug, Clone)]
pub struct MockBoxModel {
    pub xyxy: Vec<[f32; 4]>,
    pub scores: Vec<f32>,
    pub class_ids: Vec<i64>,
    pub masks: Option<Vec<Array2<f32>>>,
}

impl BoxModel for MockBoxModel {
    fn infer(&self, _input: ArrayView4<f32>, _params: &DetectionParams) -> Result<RawBoxes> {
        Ok(RawBoxes {
            xyxy: self.xyxy.clone(),
            scores: self.scores.clone(),
            class_ids: self.class_ids.clone(),
            masks: self.masks.clone(),
        })
    }
}

/// Instance-segmentation model returning fixed scores, labels and masks.
#[derive(Debug, Clone)]
pub struct MockInstanceModel {
    pub scores: Vec<f32>,
    pub labels: Vec<i64>,
    pub masks: Vec<Array2<f32>>,
}

impl InstanceMaskModel for MockInstanceModel {
    fn infer(&self, _input: ArrayView4<f32>) -> Result<RawInstances> {
        Ok(RawInstances {
            scores: self.scores.clone(),
            labels: self.labels.clone(),
            masks: self.masks.clone(),
        })
    }
}

/// Dense model returning a fixed raw score map.
#[derive(Debug, Clone)]
pub struct MockDenseModel {
    pub scores: Array3<f32>,
}

impl MockDenseModel {
    /// Build a single-channel model from target probabilities. The
    /// predictor applies the logistic transform, so the stored scores are
    /// the corresponding logits.
    pub fn from_probabilities(probabilities: Array2<f32>) -> Self {
        let logits = probabilities.mapv(|p| {
            let p = p.clamp(1e-6, 1.0 - 1e-6);
            (p / (1.0 - p)).ln()
        });
        Self {
            scores: logits.insert_axis(Axis(0)),
        }
    }
}

impl DenseScoreModel for MockDenseModel {
    fn infer(&self, _input: ArrayView4<f32>) -> Result<Array3<f32>> {
        Ok(self.scores.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_probabilities_round_trips_through_sigmoid() {
        let probs = Array2::from_elem((4, 4), 0.9f32);
        let mock = MockDenseModel::from_probabilities(probs);
        let logit = mock.scores[[0, 0, 0]];
        let recovered = 1.0 / (1.0 + (-logit).exp());
        assert!((recovered - 0.9).abs() < 1e-5);
    }
}
