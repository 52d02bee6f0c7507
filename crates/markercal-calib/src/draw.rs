//! Pattern overlays on RGB frames.

use image::{Rgb, RgbImage};
use markercal_core::draw::{draw_circle, draw_line, RED};
use nalgebra::Point2;

use crate::pattern::BoardSize;

const RADIUS: i32 = 4;

const ROW_COLORS: [Rgb<u8>; 7] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 200, 200]),
    Rgb([0, 0, 255]),
    Rgb([255, 0, 255]),
];

fn px(p: Point2<f32>) -> (i32, i32) {
    (p.x.round() as i32, p.y.round() as i32)
}

fn draw_marker(view: &mut RgbImage, p: Point2<f32>, color: Rgb<u8>) {
    let (x, y) = px(p);
    draw_line(view, (x - RADIUS, y - RADIUS), (x + RADIUS, y + RADIUS), color, 1);
    draw_line(view, (x - RADIUS, y + RADIUS), (x + RADIUS, y - RADIUS), color, 1);
    draw_circle(view, (x, y), RADIUS, color, false);
}

/// Draw detected pattern features.
///
/// A complete detection gets one color per row and a polyline through the
/// features in order; otherwise every point is drawn in red.
pub fn draw_chessboard_corners(
    view: &mut RgbImage,
    board: BoardSize,
    points: &[Point2<f32>],
    found: bool,
) {
    if !found || board.width == 0 || points.len() != board.count() {
        for &p in points {
            draw_marker(view, p, RED);
        }
        return;
    }
    let mut prev: Option<Point2<f32>> = None;
    for (row, chunk) in points.chunks(board.width).enumerate() {
        let color = ROW_COLORS[row % ROW_COLORS.len()];
        for &p in chunk {
            if let Some(q) = prev {
                draw_line(view, px(q), px(p), color, 1);
            }
            draw_marker(view, p, color);
            prev = Some(p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<Point2<f32>> {
        (0..2)
            .flat_map(|i| (0..3).map(move |j| Point2::new(20.0 + 20.0 * j as f32, 20.0 + 30.0 * i as f32)))
            .collect()
    }

    #[test]
    fn found_rows_get_their_own_colors() {
        let mut view = RgbImage::new(100, 80);
        draw_chessboard_corners(&mut view, BoardSize::new(3, 2), &grid(), true);
        assert_eq!(*view.get_pixel(30, 20), ROW_COLORS[0]);
        assert_eq!(*view.get_pixel(30, 50), ROW_COLORS[1]);
        // Row link from the last point of row 0 to the first of row 1.
        assert_ne!(*view.get_pixel(40, 35), Rgb([0, 0, 0]));
    }

    #[test]
    fn partial_detection_is_red_without_links() {
        let mut view = RgbImage::new(100, 80);
        let pts = grid();
        draw_chessboard_corners(&mut view, BoardSize::new(3, 2), &pts[..4], false);
        assert_eq!(*view.get_pixel(24, 20), RED);
        assert_eq!(*view.get_pixel(30, 20), Rgb([0, 0, 0]));
    }
}
