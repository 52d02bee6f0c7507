//! Planar calibration patterns: board geometry and detection.

mod chess_response;
mod chessboard;
mod circles;
mod grid;
mod subpix;

use std::fmt;
use std::str::FromStr;

use markercal_core::GrayImageView;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

pub use chess_response::{chess_corners, chess_response, ChessCorner, ResponseMap};
pub use chessboard::{find_chessboard_corners, ChessboardParams};
pub use circles::{detect_blobs, find_circles_grid, Blob, BlobParams};
pub use grid::{GridGraph, GridGraphParams, NeighborDirection, NodeNeighbor};
pub use subpix::{corner_sub_pix, SubPixParams};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    #[serde(rename = "CHESSBOARD")]
    Chessboard,
    #[serde(rename = "CIRCLES_GRID")]
    CirclesGrid,
    #[serde(rename = "ASYMMETRIC_CIRCLES_GRID")]
    AsymmetricCirclesGrid,
}

impl Pattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            Pattern::Chessboard => "CHESSBOARD",
            Pattern::CirclesGrid => "CIRCLES_GRID",
            Pattern::AsymmetricCirclesGrid => "ASYMMETRIC_CIRCLES_GRID",
        }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown calibration pattern: {0}")]
pub struct UnknownPattern(pub String);

impl FromStr for Pattern {
    type Err = UnknownPattern;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CHESSBOARD" => Ok(Pattern::Chessboard),
            "CIRCLES_GRID" => Ok(Pattern::CirclesGrid),
            "ASYMMETRIC_CIRCLES_GRID" => Ok(Pattern::AsymmetricCirclesGrid),
            other => Err(UnknownPattern(other.to_string())),
        }
    }
}

/// Number of pattern features per row (`width`) and rows (`height`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BoardSize {
    pub width: usize,
    pub height: usize,
}

impl BoardSize {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn count(&self) -> usize {
        self.width * self.height
    }
}

/// Ideal feature positions on the board plane (z = 0), row-major.
///
/// Asymmetric grids shift every odd row by one square, so columns are
/// `2·square` apart.
pub fn calc_board_corner_positions(
    board: BoardSize,
    square_size: f32,
    pattern: Pattern,
) -> Vec<Point3<f32>> {
    let mut out = Vec::with_capacity(board.count());
    for i in 0..board.height {
        for j in 0..board.width {
            let x = match pattern {
                Pattern::Chessboard | Pattern::CirclesGrid => j as f32 * square_size,
                Pattern::AsymmetricCirclesGrid => (2 * j + i % 2) as f32 * square_size,
            };
            out.push(Point3::new(x, i as f32 * square_size, 0.0));
        }
    }
    out
}

/// Find the pattern in a gray frame. Chessboard corners come back refined
/// to sub-pixel accuracy.
pub fn find_pattern(
    gray: &GrayImageView<'_>,
    board: BoardSize,
    pattern: Pattern,
) -> Option<Vec<Point2<f32>>> {
    match pattern {
        Pattern::Chessboard => {
            let mut corners = find_chessboard_corners(gray, board, &ChessboardParams::default())?;
            corner_sub_pix(gray, &mut corners, &SubPixParams::default());
            Some(corners)
        }
        Pattern::CirclesGrid => find_circles_grid(gray, board, true, &BlobParams::default()),
        Pattern::AsymmetricCirclesGrid => {
            find_circles_grid(gray, board, false, &BlobParams::default())
        }
    }
}

#[cfg(test)]
pub(crate) mod synthetic {
    //! Rendered boards for tests.

    use markercal_core::{GrayImage, Homography};
    use nalgebra::Point2;

    /// Chessboard with `w × h` inner corners, `square` px squares, top-left
    /// square at `origin`. The first square is dark.
    pub fn chessboard(
        img_w: usize,
        img_h: usize,
        w: usize,
        h: usize,
        square: usize,
        origin: (usize, usize),
    ) -> GrayImage {
        let mut img = GrayImage::filled(img_w, img_h, 220);
        for sy in 0..=h {
            for sx in 0..=w {
                if (sx + sy) % 2 != 0 {
                    continue;
                }
                for y in 0..square {
                    for x in 0..square {
                        let px = origin.0 + sx * square + x;
                        let py = origin.1 + sy * square + y;
                        if px < img_w && py < img_h {
                            img.set(px, py, 30);
                        }
                    }
                }
            }
        }
        img
    }

    /// Render a board given in plane coordinates through a homography
    /// (plane → image), supersampled 4×.
    pub fn render_warped<F>(img_w: usize, img_h: usize, h: &Homography, inside_dark: F) -> GrayImage
    where
        F: Fn(f64, f64) -> Option<bool>,
    {
        let mut img = GrayImage::filled(img_w, img_h, 200);
        let Some(inv) = h.inverse() else {
            return img;
        };
        const SS: usize = 4;
        for y in 0..img_h {
            for x in 0..img_w {
                let mut acc = 0u32;
                let mut any = false;
                for sy in 0..SS {
                    for sx in 0..SS {
                        let p = Point2::new(
                            x as f64 + (sx as f64 + 0.5) / SS as f64 - 0.5,
                            y as f64 + (sy as f64 + 0.5) / SS as f64 - 0.5,
                        );
                        let q = inv.apply(p);
                        let v = match inside_dark(q.x, q.y) {
                            Some(true) => 30,
                            Some(false) => 220,
                            None => 200,
                        };
                        any |= v != 200;
                        acc += v;
                    }
                }
                if any {
                    img.set(x, y, (acc / (SS * SS) as u32) as u8);
                }
            }
        }
        img
    }

    /// Plane-space predicate for a chessboard with `w × h` inner corners and
    /// unit squares; inner corner (j, i) sits at plane point (j + 1, i + 1).
    pub fn chessboard_plane(w: usize, h: usize) -> impl Fn(f64, f64) -> Option<bool> {
        move |x, y| {
            let margin = 0.6;
            if x < -margin || y < -margin || x > (w + 1) as f64 + margin || y > (h + 1) as f64 + margin
            {
                return None;
            }
            if x < 0.0 || y < 0.0 || x >= (w + 1) as f64 || y >= (h + 1) as f64 {
                return Some(false);
            }
            let (sx, sy) = (x.floor() as i64, y.floor() as i64);
            Some((sx + sy) % 2 == 0)
        }
    }

    /// Dark discs of `radius` on white, centers given in pixels.
    pub fn discs(img_w: usize, img_h: usize, centers: &[Point2<f32>], radius: f32) -> GrayImage {
        let mut img = GrayImage::filled(img_w, img_h, 225);
        const SS: usize = 4;
        for c in centers {
            let x0 = (c.x - radius - 1.0).floor().max(0.0) as usize;
            let y0 = (c.y - radius - 1.0).floor().max(0.0) as usize;
            let x1 = ((c.x + radius + 2.0).ceil() as usize).min(img_w);
            let y1 = ((c.y + radius + 2.0).ceil() as usize).min(img_h);
            for y in y0..y1 {
                for x in x0..x1 {
                    let mut inside = 0u32;
                    for sy in 0..SS {
                        for sx in 0..SS {
                            let px = x as f32 + (sx as f32 + 0.5) / SS as f32 - 0.5;
                            let py = y as f32 + (sy as f32 + 0.5) / SS as f32 - 0.5;
                            if (px - c.x).powi(2) + (py - c.y).powi(2) <= radius * radius {
                                inside += 1;
                            }
                        }
                    }
                    if inside > 0 {
                        let frac = inside as f32 / (SS * SS) as f32;
                        let v = 225.0 - frac * (225.0 - 25.0);
                        let prev = img.get(x, y) as f32;
                        img.set(x, y, v.min(prev) as u8);
                    }
                }
            }
        }
        img
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pattern_names() {
        assert_eq!("CHESSBOARD".parse::<Pattern>().ok(), Some(Pattern::Chessboard));
        assert_eq!(
            "ASYMMETRIC_CIRCLES_GRID".parse::<Pattern>().ok(),
            Some(Pattern::AsymmetricCirclesGrid)
        );
        assert!("chessboard".parse::<Pattern>().is_err());
        assert_eq!(Pattern::CirclesGrid.to_string(), "CIRCLES_GRID");
    }

    #[test]
    fn board_positions_are_row_major() {
        let pts = calc_board_corner_positions(BoardSize::new(3, 2), 10.0, Pattern::Chessboard);
        assert_eq!(pts.len(), 6);
        assert_eq!(pts[1], Point3::new(10.0, 0.0, 0.0));
        assert_eq!(pts[3], Point3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn asymmetric_rows_are_offset() {
        let pts = calc_board_corner_positions(
            BoardSize::new(3, 2),
            5.0,
            Pattern::AsymmetricCirclesGrid,
        );
        assert_eq!(pts[1], Point3::new(10.0, 0.0, 0.0));
        assert_eq!(pts[3], Point3::new(5.0, 5.0, 0.0));
        assert_eq!(pts[5], Point3::new(25.0, 5.0, 0.0));
    }

    #[test]
    fn find_pattern_refines_chessboard_corners() {
        let img = synthetic::chessboard(320, 240, 6, 4, 24, (40, 40));
        let pts = find_pattern(&img.view(), BoardSize::new(6, 4), Pattern::Chessboard)
            .expect("board found");
        assert_eq!(pts.len(), 24);
        for (k, p) in pts.iter().enumerate() {
            let (j, i) = (k % 6, k / 6);
            let ex = 40.0 + (j + 1) as f32 * 24.0 - 0.5;
            let ey = 40.0 + (i + 1) as f32 * 24.0 - 0.5;
            assert!(
                (p.x - ex).abs() < 0.3 && (p.y - ey).abs() < 0.3,
                "corner {k}: ({}, {}) vs ({ex}, {ey})",
                p.x,
                p.y
            );
        }
    }
}
