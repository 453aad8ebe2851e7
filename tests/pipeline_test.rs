//! End-to-end pipeline tests: mock models behind the registry, checked
//! against the persisted result schema.

use endoscan::box_detection::{BoxPredictor, DetectionParams};
use endoscan::instance_segmentation::{InstanceSegParams, InstanceSegPredictor};
use endoscan::mocks::{MockBoxModel, MockDenseModel, MockInstanceModel};
use endoscan::registry::{ModelRegistry, TaskPredictor};
use endoscan::semantic_segmentation::{SemanticSegParams, SemanticSegPredictor};
use endoscan::summary::SizeClass;
use endoscan::TaskKind;
use image::RgbImage;
use ndarray::Array2;

fn test_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 251) as u8, (y % 241) as u8, 77])
    })
}

/// Model-resolution probability mask with one filled square.
fn square_mask(size: usize, x0: usize, y0: usize, side: usize, value: f32) -> Array2<f32> {
    let mut mask = Array2::<f32>::zeros((size, size));
    for y in y0..y0 + side {
        for x in x0..x0 + side {
            mask[[y, x]] = value;
        }
    }
    mask
}

#[test]
fn test_instance_segmentation_end_to_end() {
    // stub model: one instance, score 0.9, fully covering a 50x50 region of
    // a 256x256 input
    let mock = MockInstanceModel {
        scores: vec![0.9],
        labels: vec![1],
        masks: vec![square_mask(256, 100, 100, 50, 0.95)],
    };
    let registry = ModelRegistry::builder()
        .register("maskrcnn", TaskKind::SegmentationInstance, move || {
            Ok(TaskPredictor::SegmentationInstance(
                InstanceSegPredictor::new(Box::new(mock.clone()), InstanceSegParams::default()),
            ))
        })
        .build();

    let image = test_image(256, 256);
    let (overlay, result) = registry.predict("maskrcnn", &image).unwrap();

    assert_eq!(result.schema, 2);
    assert_eq!(result.result_meta.task, TaskKind::SegmentationInstance);
    assert_eq!(result.result_meta.model_name, "maskrcnn");

    assert_eq!(result.detections.len(), 1);
    let det = &result.detections[0];
    assert!((det.confidence - 0.9).abs() < 1e-6);
    assert_eq!(det.mask_area_px, Some(2500));
    assert_eq!(det.mask_polygons.as_ref().unwrap().len(), 1);

    // the overlay differs inside the masked region and nowhere beyond the
    // outline/centroid decorations around it
    assert_ne!(overlay.get_pixel(125, 125), image.get_pixel(125, 125));
    for (x, y) in [(20u32, 20u32), (90, 90), (200, 40), (30, 220)] {
        assert_eq!(
            overlay.get_pixel(x, y),
            image.get_pixel(x, y),
            "pixel ({x},{y}) outside the lesion region changed"
        );
    }

    // clinical view: 2500 / 65536 px ≈ 3.8% coverage -> small
    let clinical = &result.summary.clinical;
    assert_eq!(clinical.polyp_count, 1);
    let lesion = &clinical.lesions[0];
    assert!((lesion.area_pct.unwrap() - 3.814).abs() < 0.01);
    assert_eq!(lesion.size_class, SizeClass::Small);
    assert_eq!(
        clinical.largest_lesion_area_pct,
        lesion.area_pct
    );
}

#[test]
fn test_semantic_segmentation_result_document() {
    let mut probs = Array2::from_elem((256, 256), 0.01f32);
    for y in 40..120 {
        for x in 40..120 {
            probs[[y, x]] = 0.95;
        }
    }
    let mock = MockDenseModel::from_probabilities(probs);
    let registry = ModelRegistry::builder()
        .register("unet", TaskKind::SegmentationSemantic, move || {
            Ok(TaskPredictor::SegmentationSemantic(
                SemanticSegPredictor::new(Box::new(mock.clone()), SemanticSegParams::default()),
            ))
        })
        .build();

    let image = test_image(256, 256);
    let (_, result) = registry.predict("unet", &image).unwrap();

    assert_eq!(result.result_meta.task, TaskKind::SegmentationSemantic);
    assert_eq!(result.detections.len(), 1);

    let det = &result.detections[0];
    assert!(det.confidence > 0.85);
    assert!(det.mask_area_px.unwrap() > 5000);
    assert!(det.bbox_xyxy.is_none());

    // timings carry every pipeline stage
    for stage in ["preprocess", "inference", "postprocess"] {
        assert!(result.summary.time_ms.contains_key(stage), "missing {stage}");
    }
}

#[test]
fn test_semantic_empty_result_has_zeroed_summary() {
    let probs = Array2::from_elem((128, 128), 0.05f32);
    let mock = MockDenseModel::from_probabilities(probs);
    let registry = ModelRegistry::builder()
        .register("unet", TaskKind::SegmentationSemantic, move || {
            Ok(TaskPredictor::SegmentationSemantic(
                SemanticSegPredictor::new(Box::new(mock.clone()), SemanticSegParams::default()),
            ))
        })
        .build();

    let image = test_image(128, 128);
    let (overlay, result) = registry.predict("unet", &image).unwrap();

    assert!(result.detections.is_empty());
    assert_eq!(result.summary.num_detections, 0);
    assert_eq!(result.summary.confidence_mean, 0.0);
    assert_eq!(result.summary.confidence_max, 0.0);
    assert_eq!(result.summary.clinical.largest_lesion_area_pct, None);
    // empty mask: the overlay is the unchanged input
    assert_eq!(overlay.as_raw(), image.as_raw());
}

#[test]
fn test_box_detection_end_to_end() {
    let mock = MockBoxModel {
        // model-space (640) box; image is 640x640 so coordinates map 1:1
        xyxy: vec![[100.0, 100.0, 300.0, 260.0]],
        scores: vec![0.85],
        class_ids: vec![0],
        masks: None,
    };
    let registry = ModelRegistry::builder()
        .register("default", TaskKind::Detection, move || {
            Ok(TaskPredictor::Detection(BoxPredictor::new(
                Box::new(mock.clone()),
                DetectionParams::default(),
            )))
        })
        .build();

    let image = test_image(640, 640);
    let (_, result) = registry.predict("default", &image).unwrap();

    assert_eq!(result.result_meta.task, TaskKind::Detection);
    assert_eq!(result.detections.len(), 1);

    let det = &result.detections[0];
    assert_eq!(det.class_name, "polyp");
    assert_eq!(det.bbox_xyxy, Some([100.0, 100.0, 300.0, 260.0]));
    assert_eq!(det.bbox_area_px, Some(32000.0));
    assert_eq!(det.aspect_ratio, Some(1.25));
    assert!(det.mask_area_px.is_none());

    // box area feeds the clinical coverage: 32000 / 409600 ≈ 7.8% -> large
    let lesion = &result.summary.clinical.lesions[0];
    assert!((lesion.area_pct.unwrap() - 7.8125).abs() < 1e-6);
    assert_eq!(lesion.size_class, SizeClass::Large);
}

#[test]
fn test_result_serializes_with_wire_field_names() {
    let mock = MockInstanceModel {
        scores: vec![0.9],
        labels: vec![1],
        masks: vec![square_mask(128, 30, 30, 40, 0.9)],
    };
    let registry = ModelRegistry::builder()
        .register("maskrcnn", TaskKind::SegmentationInstance, move || {
            Ok(TaskPredictor::SegmentationInstance(
                InstanceSegPredictor::new(
                    Box::new(mock.clone()),
                    InstanceSegParams {
                        input_size: 128,
                        ..InstanceSegParams::default()
                    },
                ),
            ))
        })
        .build();

    let (_, result) = registry.predict("maskrcnn", &test_image(128, 128)).unwrap();
    let json = serde_json::to_value(&result).unwrap();

    assert_eq!(json["schema"], 2);
    assert_eq!(json["result_meta"]["task"], "segmentation_instance");
    assert!(json["detections"][0]["mask_area_px"].is_number());
    assert!(json["detections"][0].get("bbox_xyxy").is_none());
    assert!(json["summary"]["clinical"]["lesions"][0]["size_class"].is_string());
}
