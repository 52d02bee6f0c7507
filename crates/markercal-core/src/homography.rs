use crate::{sample_bilinear_u8, GrayImage, GrayImageView};
use image::{Rgb, RgbImage};
use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HomographyError {
    #[error("point count mismatch: {src} source vs {dst} destination points")]
    MismatchedLengths { src: usize, dst: usize },
    #[error("at least 4 correspondences are required, got {0}")]
    TooFewPoints(usize),
    #[error("degenerate point configuration")]
    Degenerate,
}

/// Planar projective map `dst ~ H * src`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Default for Homography {
    fn default() -> Self {
        Self::identity()
    }
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn identity() -> Self {
        Self::new(Matrix3::identity())
    }

    pub fn from_rows(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_fn(|r, c| rows[r][c]))
    }

    pub fn rows(&self) -> [[f64; 3]; 3] {
        std::array::from_fn(|r| std::array::from_fn(|c| self.h[(r, c)]))
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    #[inline]
    pub fn apply_f32(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().map(Self::new)
    }

    /// `self ∘ other`: apply `other` first.
    pub fn compose(&self, other: &Homography) -> Self {
        Self::new(self.h * other.h)
    }
}

/// Translate to the centroid and scale so the mean distance is sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), p| (ax + p.x, ay + p.y));
    let (cx, cy) = (sx / n, sy / n);
    let mean_dist = pts
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    let s = if mean_dist > 1e-12 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let out = pts
        .iter()
        .map(|p| Point2::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    (out, t)
}

fn finish(hn: Matrix3<f64>, t_src: Matrix3<f64>, t_dst: Matrix3<f64>) -> Result<Homography, HomographyError> {
    let t_dst_inv = t_dst.try_inverse().ok_or(HomographyError::Degenerate)?;
    let h = t_dst_inv * hn * t_src;
    let s = h[(2, 2)];
    if !s.is_finite() || s.abs() < 1e-12 {
        return Err(HomographyError::Degenerate);
    }
    let h = h / s;
    if h.iter().any(|v| !v.is_finite()) {
        return Err(HomographyError::Degenerate);
    }
    Ok(Homography::new(h))
}

/// Estimate `H` with `dst ~ H * src` from N >= 4 correspondences (normalized DLT).
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, HomographyError> {
    if src.len() != dst.len() {
        return Err(HomographyError::MismatchedLengths {
            src: src.len(),
            dst: dst.len(),
        });
    }
    if src.len() < 4 {
        return Err(HomographyError::TooFewPoints(src.len()));
    }
    if src.len() == 4 {
        let s: [Point2<f64>; 4] = std::array::from_fn(|i| src[i]);
        let d: [Point2<f64>; 4] = std::array::from_fn(|i| dst[i]);
        return homography_from_4pt(&s, &d);
    }

    let (sn, ts) = normalize_points(src);
    let (dn, td) = normalize_points(dst);

    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let (x, y) = (sn[k].x, sn[k].y);
        let (u, v) = (dn[k].x, dn[k].y);

        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // h is the right singular vector of the smallest singular value. A 2N x 9
    // thin SVD only yields min(2N, 9) rows of V^T, so go through A^T A.
    let ata = a.transpose() * &a;
    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(HomographyError::Degenerate)?;
    let h = eig.eigenvectors.column(min_idx);
    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

    finish(hn, ts, td)
}

/// Exact homography from 4 correspondences with `h33 = 1`.
///
/// Corner order must be consistent between `src` and `dst`.
pub fn homography_from_4pt(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Result<Homography, HomographyError> {
    let (sn, ts) = normalize_points(src);
    let (dn, td) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for k in 0..4 {
        let (x, y) = (sn[k].x, sn[k].y);
        let (u, v) = (dn[k].x, dn[k].y);

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = r0 + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a.lu().solve(&b).ok_or(HomographyError::Degenerate)?;
    let hn = Matrix3::new(x[0], x[1], x[2], x[3], x[4], x[5], x[6], x[7], 1.0);
    finish(hn, ts, td)
}

/// Resample `src` into a `out_w x out_h` image. `h_src_from_dst` maps output
/// pixel coordinates into the source image.
pub fn warp_perspective_gray(
    src: &GrayImageView<'_>,
    h_src_from_dst: &Homography,
    out_w: usize,
    out_h: usize,
) -> GrayImage {
    let mut out = GrayImage::new(out_w, out_h);
    for y in 0..out_h {
        for x in 0..out_w {
            let p = h_src_from_dst.apply(Point2::new(x as f64, y as f64));
            out.data[y * out_w + x] = sample_bilinear_u8(src, p.x as f32, p.y as f32);
        }
    }
    out
}

/// RGB counterpart of [`warp_perspective_gray`]; pixels that map outside
/// `src` are black.
pub fn warp_perspective_rgb(
    src: &RgbImage,
    h_src_from_dst: &Homography,
    out_w: u32,
    out_h: u32,
) -> RgbImage {
    let (w, h) = src.dimensions();
    let fetch = |x: i64, y: i64| -> [f32; 3] {
        if x < 0 || y < 0 || x >= w as i64 || y >= h as i64 {
            return [0.0; 3];
        }
        let p = src.get_pixel(x as u32, y as u32).0;
        [p[0] as f32, p[1] as f32, p[2] as f32]
    };
    RgbImage::from_fn(out_w, out_h, |x, y| {
        let p = h_src_from_dst.apply(Point2::new(x as f64, y as f64));
        if !p.x.is_finite() || !p.y.is_finite() {
            return Rgb([0, 0, 0]);
        }
        let x0 = p.x.floor();
        let y0 = p.y.floor();
        let fx = (p.x - x0) as f32;
        let fy = (p.y - y0) as f32;
        let (x0, y0) = (x0 as i64, y0 as i64);
        let p00 = fetch(x0, y0);
        let p10 = fetch(x0 + 1, y0);
        let p01 = fetch(x0, y0 + 1);
        let p11 = fetch(x0 + 1, y0 + 1);
        let mut out = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] + fx * (p10[c] - p00[c]);
            let bottom = p01[c] + fx * (p11[c] - p01[c]);
            out[c] = (top + fy * (bottom - top)).round().clamp(0.0, 255.0) as u8;
        }
        Rgb(out)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6}) within {}",
            a.x,
            a.y,
            b.x,
            b.y,
            tol
        );
    }

    fn ground_truth() -> Homography {
        Homography::new(Matrix3::new(
            0.9, 0.08, 40.0, //
            -0.04, 1.05, 25.0, //
            0.0007, -0.0003, 1.0,
        ))
    }

    #[test]
    fn inverse_maps_back() {
        let h = ground_truth();
        let inv = h.inverse().expect("invertible");
        for p in [Point2::new(0.0, 0.0), Point2::new(123.0, -45.0), Point2::new(300.0, 220.0)] {
            assert_close(inv.apply(h.apply(p)), p, 1e-8);
        }
    }

    #[test]
    fn four_points_recover_exact_map() {
        let h = ground_truth();
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(200.0, 0.0),
            Point2::new(200.0, 100.0),
            Point2::new(0.0, 100.0),
        ];
        let dst = src.map(|p| h.apply(p));
        let est = homography_from_4pt(&src, &dst).expect("solvable");
        for p in [Point2::new(50.0, 50.0), Point2::new(170.0, 10.0)] {
            assert_close(est.apply(p), h.apply(p), 1e-6);
        }
    }

    #[test]
    fn dlt_recovers_map_from_grid() {
        let h = ground_truth();
        let src: Vec<Point2<f64>> = (0..4)
            .flat_map(|r| (0..5).map(move |c| Point2::new(c as f64 * 30.0, r as f64 * 30.0)))
            .collect();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| h.apply(p)).collect();
        let est = estimate_homography(&src, &dst).expect("estimate");
        for p in [Point2::new(15.0, 15.0), Point2::new(100.0, 80.0)] {
            assert_close(est.apply(p), h.apply(p), 1e-6);
        }
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(3.0, 0.0),
        ];
        let dst = src;
        assert!(homography_from_4pt(&src, &dst).is_err());
    }

    #[test]
    fn mismatched_lengths_fail() {
        let src = [Point2::new(0.0, 0.0); 5];
        let dst = [Point2::new(1.0, 1.0); 4];
        assert_eq!(
            estimate_homography(&src, &dst),
            Err(HomographyError::MismatchedLengths { src: 5, dst: 4 })
        );
    }

    #[test]
    fn warp_with_identity_copies_pixels() {
        let mut img = GrayImage::new(4, 3);
        img.set(2, 1, 250);
        let out = warp_perspective_gray(&img.view(), &Homography::identity(), 4, 3);
        assert_eq!(out.get(2, 1), 250);
        assert_eq!(out.get(0, 0), 0);
    }

    #[test]
    fn rgb_warp_translates_and_blacks_out_the_outside() {
        let src = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 200]));
        let shift = Homography::from_rows([[1.0, 0.0, 2.0], [0.0, 1.0, 3.0], [0.0, 0.0, 1.0]]);
        let out = warp_perspective_rgb(&src, &shift, 8, 8);
        assert_eq!(*out.get_pixel(0, 0), Rgb([20, 30, 200]));
        assert_eq!(*out.get_pixel(4, 2), Rgb([60, 50, 200]));
        assert_eq!(*out.get_pixel(7, 7), Rgb([0, 0, 0]));
    }
}
