//! Marker overlays on RGB frames.

use image::RgbImage;
use markercal_core::draw::{draw_polygon, draw_rect, put_text, text_size, BLUE, GREEN, MAGENTA, RED};
use nalgebra::Point2;

use crate::ArucoMarker;

/// Outline every marker, mark its first corner and print its id.
pub fn draw_markers_on_frame(frame: &mut RgbImage, markers: &[ArucoMarker]) {
    for m in markers {
        draw_polygon(frame, &m.corners, GREEN, 1);
        let c0 = m.corners[0];
        draw_rect(frame, (c0.x.round() as i32 - 3, c0.y.round() as i32 - 3), (7, 7), RED);

        let label = format!("id={}", m.id);
        let (w, h) = text_size(&label, 1);
        let c = m.center();
        let origin = (
            c.x.round() as i32 - w as i32 / 2,
            c.y.round() as i32 + h as i32 / 2,
        );
        put_text(frame, &label, origin, 1, BLUE);
    }
}

/// Outline quads that did not decode.
pub fn draw_rejected_on_frame(frame: &mut RgbImage, rejected: &[[Point2<f32>; 4]]) {
    for quad in rejected {
        draw_polygon(frame, quad, MAGENTA, 1);
    }
}
