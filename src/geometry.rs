//! Pure geometry over binary masks: contour extraction, centroids,
//! connected-component labeling and resolution remapping.
//!
//! Everything here is deterministic and side-effect free; this is the unit
//! test surface for the rest of the core.

use image::{imageops, GrayImage, ImageBuffer, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::point::Point;
use imageproc::region_labelling::{connected_components, Connectivity};
use ndarray::Array2;

/// Dense per-pixel probability map in `[0, 1]`.
pub type ProbMap = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Component label image produced by [`label_components`].
pub type LabelMap = ImageBuffer<Luma<u32>, Vec<u32>>;

pub const FOREGROUND: u8 = 255;

/// Count of set pixels.
pub fn mask_area(mask: &GrayImage) -> u64 {
    mask.pixels().filter(|p| p[0] != 0).count() as u64
}

/// External contours of a binary mask. Holes are not represented and
/// degenerate contours (fewer than 3 points) are dropped.
pub fn outer_contours(mask: &GrayImage) -> Vec<Vec<Point<i32>>> {
    find_contours::<i32>(mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer && c.points.len() >= 3)
        .map(|c| c.points)
        .collect()
}

/// External contours as flat `[x0, y0, x1, y1, ..]` float sequences, the
/// shape the result schema stores.
pub fn mask_to_polygons(mask: &GrayImage) -> Vec<Vec<f32>> {
    outer_contours(mask)
        .iter()
        .map(|points| {
            points
                .iter()
                .flat_map(|p| [p.x as f32, p.y as f32])
                .collect()
        })
        .collect()
}

/// Moment-based centroid of a closed contour. Returns `None` for the
/// zero-area degenerate case (collinear or repeated points).
pub fn contour_centroid(points: &[Point<i32>]) -> Option<(f32, f32)> {
    if points.len() < 3 {
        return None;
    }
    let mut area2 = 0.0f64;
    let mut cx = 0.0f64;
    let mut cy = 0.0f64;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        let cross = p.x as f64 * q.y as f64 - q.x as f64 * p.y as f64;
        area2 += cross;
        cx += (p.x + q.x) as f64 * cross;
        cy += (p.y + q.y) as f64 * cross;
    }
    if area2.abs() < f64::EPSILON {
        return None;
    }
    let scale = 1.0 / (3.0 * area2);
    Some(((cx * scale) as f32, (cy * scale) as f32))
}

/// Label connected foreground regions and return the label image together
/// with the number of components.
///
/// Labeling is 8-connected: diagonally touching fragments count as one
/// lesion. This choice changes component counts on diagonal-adjacent
/// regions and is pinned by tests.
pub fn label_components(mask: &GrayImage) -> (LabelMap, u32) {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let count = labels.pixels().map(|p| p[0]).max().unwrap_or(0);
    (labels, count)
}

/// Extract the binary mask of a single labeled component.
pub fn component_mask(labels: &LabelMap, label: u32) -> GrayImage {
    let (w, h) = labels.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        if labels.get_pixel(x, y)[0] == label {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Binarize a model-resolution probability array at `threshold`
/// (strictly greater, matching instance-mask binarization).
pub fn binarize(map: &Array2<f32>, threshold: f32) -> GrayImage {
    let (h, w) = map.dim();
    GrayImage::from_fn(w as u32, h as u32, |x, y| {
        if map[[y as usize, x as usize]] > threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Threshold a dense probability map at `threshold` (greater-or-equal,
/// matching dense-map thresholding).
pub fn threshold_probabilities(map: &ProbMap, threshold: f32) -> GrayImage {
    let (w, h) = map.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        if map.get_pixel(x, y)[0] >= threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Resize a binary mask with nearest-neighbor sampling so hard 0/1 edges
/// survive the upscale.
pub fn resize_mask_nearest(mask: &GrayImage, width: u32, height: u32) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return mask.clone();
    }
    imageops::resize(mask, width, height, imageops::FilterType::Nearest)
}

/// Resize a continuous probability map with bilinear interpolation.
pub fn resize_probabilities(map: &ProbMap, width: u32, height: u32) -> ProbMap {
    if map.dimensions() == (width, height) {
        return map.clone();
    }
    imageops::resize(map, width, height, imageops::FilterType::Triangle)
}
