//! Overlay rendering for persisted scan artifacts.
//!
//! Mask overlays composite a translucent fill over the lesion footprint,
//! outline each contour and optionally mark contour centroids with a
//! two-tone dot. Rendering is deterministic for identical inputs, which
//! regression tests rely on.

use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::detection::Detection;
use crate::geometry::{contour_centroid, mask_area, outer_contours};

#[derive(Debug, Clone)]
pub struct OverlayStyle {
    pub fill_color: Rgb<u8>,
    pub fill_alpha: f32,
    pub line_color: Rgb<u8>,
    pub line_thickness: u32,
    pub draw_centroid: bool,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            fill_color: Rgb([255, 0, 0]),
            fill_alpha: 0.7,
            line_color: Rgb([0, 255, 255]),
            line_thickness: 3,
            draw_centroid: true,
        }
    }
}

impl OverlayStyle {
    /// Red fill + cyan outline, used for instance segmentation overlays.
    pub fn instance() -> Self {
        Self::default()
    }

    /// Green fill + cyan outline, used for semantic segmentation overlays.
    pub fn semantic() -> Self {
        Self {
            fill_color: Rgb([0, 200, 0]),
            ..Self::default()
        }
    }
}

/// Composite a high-visibility mask overlay onto `image`.
///
/// Returns the input unchanged when the mask is empty. The mask must match
/// the image resolution.
pub fn render_mask_overlay(image: &RgbImage, mask: &GrayImage, style: &OverlayStyle) -> RgbImage {
    if mask_area(mask) == 0 {
        return image.clone();
    }
    debug_assert_eq!(image.dimensions(), mask.dimensions());

    let alpha = style.fill_alpha.clamp(0.0, 1.0);
    let mut out = image.clone();

    // translucent fill over the mask footprint
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        if mask.get_pixel(x, y)[0] != 0 {
            for c in 0..3 {
                pixel[c] =
                    ((1.0 - alpha) * pixel[c] as f32 + alpha * style.fill_color[c] as f32) as u8;
            }
        }
    }

    let contours = outer_contours(mask);
    for points in &contours {
        draw_thick_closed_polyline(&mut out, points, style.line_color, style.line_thickness);
    }

    if style.draw_centroid {
        for points in &contours {
            if let Some((cx, cy)) = contour_centroid(points) {
                let center = (cx.round() as i32, cy.round() as i32);
                draw_filled_circle_mut(&mut out, center, 5, Rgb([255, 255, 255]));
                draw_hollow_circle_mut(&mut out, center, 8, Rgb([0, 0, 0]));
            }
        }
    }

    out
}

/// Draw thick hollow rectangles for box-task detections.
pub fn render_box_overlay(image: &RgbImage, detections: &[Detection]) -> RgbImage {
    let mut out = image.clone();
    let box_color = Rgb([255, 60, 60]);

    for detection in detections {
        let Some([x1, y1, x2, y2]) = detection.bbox_xyxy else {
            continue;
        };
        let x = x1.floor() as i32;
        let y = y1.floor() as i32;
        let w = (x2 - x1).max(1.0) as u32;
        let h = (y2 - y1).max(1.0) as u32;

        // 3 pixels thick
        for offset in 0..3i32 {
            let rect = Rect::at(x - offset, y - offset)
                .of_size(w + (offset * 2) as u32, h + (offset * 2) as u32);
            draw_hollow_rect_mut(&mut out, rect, box_color);
        }
    }

    out
}

fn draw_thick_closed_polyline(
    img: &mut RgbImage,
    points: &[Point<i32>],
    color: Rgb<u8>,
    thickness: u32,
) {
    let r = (thickness.max(1) / 2) as i32;
    for i in 0..points.len() {
        let p = points[i];
        let q = points[(i + 1) % points.len()];
        for dy in -r..=r {
            for dx in -r..=r {
                draw_line_segment_mut(
                    img,
                    (p.x as f32 + dx as f32, p.y as f32 + dy as f32),
                    (q.x as f32 + dx as f32, q.y as f32 + dy as f32),
                    color,
                );
            }
        }
    }
}
