//! ChESS X-junction response on a 16-sample ring of radius 5.
//!
//! `R = SR − DR − 16·MR` where `SR` sums the differences of samples a
//! quarter turn apart, `DR` sums the differences of opposite samples and
//! `MR` compares the ring mean with a small cross at the center.

use markercal_core::GrayImageView;
use nalgebra::Point2;

const RING: [(i32, i32); 16] = [
    (0, -5),
    (2, -5),
    (3, -3),
    (5, -2),
    (5, 0),
    (5, 2),
    (3, 3),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-3, 3),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-3, -3),
    (-2, -5),
];

const RADIUS: usize = 5;

/// Dense response image; zero where the ring does not fit.
#[derive(Clone, Debug)]
pub struct ResponseMap {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl ResponseMap {
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// A response peak with its strength and bright-diagonal direction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChessCorner {
    pub position: Point2<f32>,
    pub response: f32,
    /// Direction of the bright diagonal in radians, modulo π.
    pub orientation: f32,
}

#[inline]
fn ring_samples(gray: &GrayImageView<'_>, x: usize, y: usize) -> [f32; 16] {
    std::array::from_fn(|n| {
        let (dx, dy) = RING[n];
        gray.get((x as i32 + dx) as usize, (y as i32 + dy) as usize) as f32
    })
}

pub fn chess_response(gray: &GrayImageView<'_>) -> ResponseMap {
    let (w, h) = (gray.width, gray.height);
    let mut data = vec![0.0f32; w * h];
    if w <= 2 * RADIUS || h <= 2 * RADIUS {
        return ResponseMap {
            width: w,
            height: h,
            data,
        };
    }

    for y in RADIUS..h - RADIUS {
        for x in RADIUS..w - RADIUS {
            let s = ring_samples(gray, x, y);
            let mut sr = 0.0;
            for n in 0..4 {
                sr += ((s[n] + s[n + 8]) - (s[n + 4] + s[n + 12])).abs();
            }
            let mut dr = 0.0;
            for n in 0..8 {
                dr += (s[n] - s[n + 8]).abs();
            }
            let ring_mean = s.iter().sum::<f32>() / 16.0;
            let cross = (gray.get(x, y) as f32
                + gray.get(x - 1, y) as f32
                + gray.get(x + 1, y) as f32
                + gray.get(x, y - 1) as f32
                + gray.get(x, y + 1) as f32)
                / 5.0;
            let mr = (ring_mean - cross).abs();
            data[y * w + x] = sr - dr - 16.0 * mr;
        }
    }

    ResponseMap {
        width: w,
        height: h,
        data,
    }
}

/// Bright-diagonal direction from the second angular harmonic of the ring.
fn ring_orientation(gray: &GrayImageView<'_>, x: usize, y: usize) -> f32 {
    let s = ring_samples(gray, x, y);
    let mean = s.iter().sum::<f32>() / 16.0;
    let (mut c, mut si) = (0.0f32, 0.0f32);
    for (n, &(dx, dy)) in RING.iter().enumerate() {
        let phi = (dy as f32).atan2(dx as f32);
        let v = s[n] - mean;
        c += v * (2.0 * phi).cos();
        si += v * (2.0 * phi).sin();
    }
    let theta = 0.5 * si.atan2(c);
    theta.rem_euclid(std::f32::consts::PI)
}

/// Non-maximum suppressed response peaks above `threshold_rel · max`.
pub fn chess_corners(
    gray: &GrayImageView<'_>,
    threshold_rel: f32,
    nms_radius: usize,
) -> Vec<ChessCorner> {
    let resp = chess_response(gray);
    let max = resp.max();
    if max <= 0.0 {
        return Vec::new();
    }
    let threshold = threshold_rel * max;
    let (w, h) = (resp.width, resp.height);
    let r = nms_radius as isize;

    let mut out = Vec::new();
    for y in RADIUS..h.saturating_sub(RADIUS) {
        for x in RADIUS..w.saturating_sub(RADIUS) {
            let v = resp.get(x, y);
            if v <= 0.0 || v < threshold {
                continue;
            }
            let mut is_peak = true;
            'nms: for dy in -r..=r {
                for dx in -r..=r {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let (nx, ny) = (x as isize + dx, y as isize + dy);
                    if nx < 0 || ny < 0 || nx >= w as isize || ny >= h as isize {
                        continue;
                    }
                    let nv = resp.get(nx as usize, ny as usize);
                    // Equal plateaus keep the first pixel in raster order.
                    let earlier = dy < 0 || (dy == 0 && dx < 0);
                    if nv > v || (nv == v && earlier) {
                        is_peak = false;
                        break 'nms;
                    }
                }
            }
            if !is_peak {
                continue;
            }

            let (mut sx, mut sy, mut sw) = (0.0f32, 0.0f32, 0.0f32);
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let (nx, ny) = ((x as i32 + dx) as usize, (y as i32 + dy) as usize);
                    let nv = resp.get(nx, ny).max(0.0);
                    sx += nv * nx as f32;
                    sy += nv * ny as f32;
                    sw += nv;
                }
            }
            out.push(ChessCorner {
                position: Point2::new(sx / sw, sy / sw),
                response: v,
                orientation: ring_orientation(gray, x, y),
            });
        }
    }

    log::debug!("chess: {} peaks above {:.1}", out.len(), threshold);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::synthetic;
    use std::f32::consts::{FRAC_PI_4, PI};

    #[test]
    fn flat_and_edge_regions_do_not_respond() {
        let mut img = markercal_core::GrayImage::filled(40, 40, 200);
        for y in 0..40 {
            for x in 20..40 {
                img.set(x, y, 20);
            }
        }
        let resp = chess_response(&img.view());
        assert!(resp.max() <= 0.0);
        assert!(chess_corners(&img.view(), 0.2, 3).is_empty());
    }

    #[test]
    fn finds_every_inner_corner_once() {
        let img = synthetic::chessboard(200, 160, 4, 3, 20, (30, 30));
        let corners = chess_corners(&img.view(), 0.2, 3);
        assert_eq!(corners.len(), 12);
        for c in &corners {
            let fx = (c.position.x - 30.0 + 0.5) / 20.0;
            let fy = (c.position.y - 30.0 + 0.5) / 20.0;
            assert!((fx - fx.round()).abs() < 0.05, "x {}", c.position.x);
            assert!((fy - fy.round()).abs() < 0.05, "y {}", c.position.y);
        }
    }

    #[test]
    fn orientations_alternate_between_diagonals() {
        let img = synthetic::chessboard(200, 160, 4, 3, 20, (30, 30));
        let corners = chess_corners(&img.view(), 0.2, 3);
        let mut seen = [false; 2];
        for c in &corners {
            let d45 = (c.orientation - FRAC_PI_4).abs();
            let d135 = (c.orientation - 3.0 * FRAC_PI_4).abs();
            assert!(d45.min(d135) < 0.2, "orientation {}", c.orientation);
            seen[(d135 < d45) as usize] = true;
        }
        assert!(seen[0] && seen[1]);
        assert!(corners.iter().all(|c| (0.0..PI).contains(&c.orientation)));
    }
}
