//! A rectangular work area anchored by four markers.
//!
//! Marker `k` (for `k` in `0..4`) pins table corner `k`, in the order
//! top-left, top-right, bottom-right, bottom-left. The anchor is the marker's
//! own corner `k`, i.e. the one on the outer side of the table. Anchors
//! persist across frames, so a marker that is briefly occluded keeps its last
//! seen position.

use image::RgbImage;
use markercal_aruco::ArucoMarker;
use markercal_core::draw::{draw_polygon, YELLOW};
use markercal_core::{homography_from_4pt, warp_perspective_rgb, Homography, HomographyError};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Number of anchor markers.
pub const TABLE_CORNERS: usize = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("table size must be non-zero, got {width}x{height}")]
    EmptySize { width: u32, height: u32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    width: u32,
    height: u32,
    corners: [Option<Point2<f32>>; TABLE_CORNERS],
}

impl Table {
    /// A table rectified into a `width x height` view.
    pub fn new(width: u32, height: u32) -> Result<Self, TableError> {
        if width == 0 || height == 0 {
            return Err(TableError::EmptySize { width, height });
        }
        Ok(Self {
            width,
            height,
            corners: [None; TABLE_CORNERS],
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Image-space anchors, `None` until the matching marker was seen.
    pub fn corners(&self) -> &[Option<Point2<f32>>; TABLE_CORNERS] {
        &self.corners
    }

    /// All four anchors are known.
    pub fn is_valid(&self) -> bool {
        self.corners.iter().all(Option::is_some)
    }

    fn quad(&self) -> Option<[Point2<f32>; TABLE_CORNERS]> {
        let [a, b, c, d] = self.corners;
        Some([a?, b?, c?, d?])
    }

    /// Move every anchor whose marker is among `found`. Returns how many
    /// anchors were updated.
    pub fn update_table_on_frame(&mut self, found: &[ArucoMarker]) -> usize {
        let mut updated = 0;
        for marker in found {
            let k = marker.id as usize;
            if k < TABLE_CORNERS {
                self.corners[k] = Some(marker.corners[k]);
                updated += 1;
            }
        }
        if updated > 0 {
            log::trace!("table anchors updated: {updated}, valid: {}", self.is_valid());
        }
        updated
    }

    /// Outline the table quad; nothing is drawn while an anchor is missing.
    pub fn draw_table_on_frame(&self, frame: &mut RgbImage) {
        if let Some(quad) = self.quad() {
            draw_polygon(frame, &quad, YELLOW, 2);
        }
    }

    /// Map from table-view pixels to frame pixels.
    pub fn frame_from_table(&self) -> Option<Result<Homography, HomographyError>> {
        let quad = self.quad()?;
        let w = (self.width - 1) as f64;
        let h = (self.height - 1) as f64;
        let rect = [
            Point2::new(0.0, 0.0),
            Point2::new(w, 0.0),
            Point2::new(w, h),
            Point2::new(0.0, h),
        ];
        let dst = quad.map(|p| Point2::new(p.x as f64, p.y as f64));
        Some(homography_from_4pt(&rect, &dst))
    }

    /// Rectified table view, or a copy of `frame` while the table is
    /// incomplete or its quad is degenerate.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn get_table_from_frame(&self, frame: &RgbImage) -> RgbImage {
        match self.frame_from_table() {
            Some(Ok(h)) => warp_perspective_rgb(frame, &h, self.width, self.height),
            Some(Err(err)) => {
                log::debug!("table quad is unusable: {err}");
                frame.clone()
            }
            None => frame.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use image::Rgb;

    fn marker(id: u32, at: Point2<f32>) -> ArucoMarker {
        let s = 10.0;
        ArucoMarker {
            id,
            corners: [
                at,
                Point2::new(at.x + s, at.y),
                Point2::new(at.x + s, at.y + s),
                Point2::new(at.x, at.y + s),
            ],
            hamming: 0,
        }
    }

    /// Markers placed so their outer corners span (10,10)-(110,60).
    fn anchors() -> Vec<ArucoMarker> {
        vec![
            marker(0, Point2::new(10.0, 10.0)),
            marker(1, Point2::new(100.0, 10.0)),
            marker(2, Point2::new(100.0, 50.0)),
            marker(3, Point2::new(10.0, 50.0)),
        ]
    }

    #[test]
    fn zero_size_is_rejected() {
        assert_eq!(
            Table::new(0, 600),
            Err(TableError::EmptySize { width: 0, height: 600 })
        );
    }

    #[test]
    fn anchors_use_the_outer_marker_corner() {
        let mut table = Table::new(100, 50).expect("table");
        assert_eq!(table.update_table_on_frame(&anchors()), 4);
        assert!(table.is_valid());
        let c = table.corners();
        assert_eq!(c[0], Some(Point2::new(10.0, 10.0)));
        assert_eq!(c[1], Some(Point2::new(110.0, 10.0)));
        assert_eq!(c[2], Some(Point2::new(110.0, 60.0)));
        assert_eq!(c[3], Some(Point2::new(10.0, 60.0)));
    }

    #[test]
    fn other_ids_are_ignored_and_anchors_persist() {
        let mut table = Table::new(100, 50).expect("table");
        let all = anchors();
        table.update_table_on_frame(&all[..3]);
        assert!(!table.is_valid());
        assert_eq!(table.update_table_on_frame(&[marker(7, Point2::new(0.0, 0.0))]), 0);
        table.update_table_on_frame(&all[3..]);
        assert!(table.is_valid());
        assert_eq!(table.corners()[0], Some(Point2::new(10.0, 10.0)));
    }

    #[test]
    fn incomplete_table_passes_the_frame_through() {
        let table = Table::new(40, 20).expect("table");
        let frame = RgbImage::from_pixel(64, 48, Rgb([1, 2, 3]));
        let out = table.get_table_from_frame(&frame);
        assert_eq!(out, frame);
    }

    #[test]
    fn valid_table_is_rectified_to_its_size() {
        let mut table = Table::new(101, 51).expect("table");
        table.update_table_on_frame(&anchors());
        let frame = RgbImage::from_fn(160, 90, |x, y| {
            if (10..=110).contains(&x) && (10..=60).contains(&y) {
                Rgb([200, 40, 40])
            } else {
                Rgb([0, 0, 255])
            }
        });

        let h = table.frame_from_table().expect("complete").expect("homography");
        let p = h.apply(Point2::new(100.0, 50.0));
        assert_relative_eq!(p.x, 110.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 60.0, epsilon = 1e-6);

        let out = table.get_table_from_frame(&frame);
        assert_eq!(out.dimensions(), (101, 51));
        assert_eq!(*out.get_pixel(0, 0), Rgb([200, 40, 40]));
        assert_eq!(*out.get_pixel(50, 25), Rgb([200, 40, 40]));
        assert_eq!(*out.get_pixel(100, 50), Rgb([200, 40, 40]));
    }

    #[test]
    fn degenerate_quad_passes_the_frame_through() {
        let mut table = Table::new(10, 10).expect("table");
        table.corners = [Some(Point2::new(5.0, 5.0)); TABLE_CORNERS];
        assert!(matches!(table.frame_from_table(), Some(Err(_))));
        let frame = RgbImage::new(20, 20);
        assert_eq!(table.get_table_from_frame(&frame).dimensions(), (20, 20));
    }

    #[test]
    fn drawing_requires_a_complete_table() {
        let mut table = Table::new(100, 50).expect("table");
        let mut frame = RgbImage::new(130, 80);
        table.draw_table_on_frame(&mut frame);
        assert!(frame.pixels().all(|p| *p == Rgb([0, 0, 0])));

        table.update_table_on_frame(&anchors());
        table.draw_table_on_frame(&mut frame);
        assert_eq!(*frame.get_pixel(60, 10), YELLOW);
    }
}
