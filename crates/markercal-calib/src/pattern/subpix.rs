//! Sub-pixel corner refinement.
//!
//! At the true corner `q`, every image gradient `g(p)` in the window is
//! orthogonal to `p − q`. Summing `g gᵀ (p − q) = 0` over a Gaussian
//! weighted window gives a 2×2 system that is iterated until the update
//! falls below `epsilon`.

use markercal_core::{sample_bilinear_clamped, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SubPixParams {
    /// Half side of the search window; the window is `2·half_window + 1`.
    pub half_window: usize,
    pub max_iter: usize,
    pub epsilon: f32,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 11,
            max_iter: 30,
            epsilon: 0.1,
        }
    }
}

/// Refine `corners` in place. A corner that drifts farther than the window
/// keeps its initial position.
pub fn corner_sub_pix(gray: &GrayImageView<'_>, corners: &mut [Point2<f32>], params: &SubPixParams) {
    let win = params.half_window as i32;
    if win < 1 || gray.width == 0 || gray.height == 0 {
        return;
    }
    let coeff = 1.0 / (win * win) as f32;
    let side = (2 * win + 1) as usize;
    let mask: Vec<f32> = (0..side * side)
        .map(|k| {
            let dx = (k % side) as i32 - win;
            let dy = (k / side) as i32 - win;
            (-((dx * dx) as f32) * coeff).exp() * (-((dy * dy) as f32) * coeff).exp()
        })
        .collect();
    let eps_sq = params.epsilon * params.epsilon;
    let (w, h) = (gray.width as f32, gray.height as f32);

    // Patch with a one pixel border for central differences.
    let pside = side + 2;
    let mut patch = vec![0.0f32; pside * pside];

    for corner in corners.iter_mut() {
        let start = *corner;
        let mut c = start;
        for _ in 0..params.max_iter.max(1) {
            for py in 0..pside {
                for px in 0..pside {
                    patch[py * pside + px] = sample_bilinear_clamped(
                        gray,
                        c.x + (px as i32 - win - 1) as f32,
                        c.y + (py as i32 - win - 1) as f32,
                    );
                }
            }

            let (mut a, mut b, mut cc, mut bb1, mut bb2) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);
            for i in 0..side {
                for j in 0..side {
                    let m = mask[i * side + j] as f64;
                    let at = |y: usize, x: usize| patch[y * pside + x] as f64;
                    let gx = at(i + 1, j + 2) - at(i + 1, j);
                    let gy = at(i + 2, j + 1) - at(i, j + 1);
                    let gxx = gx * gx * m;
                    let gxy = gx * gy * m;
                    let gyy = gy * gy * m;
                    let px = j as f64 - win as f64;
                    let py = i as f64 - win as f64;
                    a += gxx;
                    b += gxy;
                    cc += gyy;
                    bb1 += gxx * px + gxy * py;
                    bb2 += gxy * px + gyy * py;
                }
            }

            let det = a * cc - b * b;
            if det.abs() <= f64::EPSILON * f64::EPSILON {
                break;
            }
            let scale = 1.0 / det;
            let next = Point2::new(
                c.x + (cc * scale * bb1 - b * scale * bb2) as f32,
                c.y + (-b * scale * bb1 + a * scale * bb2) as f32,
            );
            let err = (next - c).norm_squared();
            c = next;
            if c.x < 0.0 || c.x >= w || c.y < 0.0 || c.y >= h || err <= eps_sq {
                break;
            }
        }

        if (c.x - start.x).abs() > win as f32 || (c.y - start.y).abs() > win as f32 {
            c = start;
        }
        *corner = c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::synthetic;

    #[test]
    fn pulls_perturbed_corners_onto_the_junction() {
        let img = synthetic::chessboard(200, 160, 4, 3, 24, (30, 30));
        let truth = [
            Point2::new(53.5f32, 53.5f32),
            Point2::new(77.5, 53.5),
            Point2::new(101.5, 77.5),
        ];
        let mut pts = [
            Point2::new(54.3f32, 52.9f32),
            Point2::new(76.6, 54.2),
            Point2::new(102.4, 76.8),
        ];
        let params = SubPixParams {
            epsilon: 0.001,
            ..Default::default()
        };
        corner_sub_pix(&img.view(), &mut pts, &params);
        for (p, t) in pts.iter().zip(&truth) {
            assert!((p - t).norm() < 0.1, "{p:?} vs {t:?}");
        }
    }

    #[test]
    fn flat_patch_leaves_points_alone() {
        let img = markercal_core::GrayImage::filled(64, 64, 90);
        let mut pts = [Point2::new(30.2f32, 31.7f32)];
        corner_sub_pix(&img.view(), &mut pts, &SubPixParams::default());
        assert_eq!(pts[0], Point2::new(30.2, 31.7));
    }
}
