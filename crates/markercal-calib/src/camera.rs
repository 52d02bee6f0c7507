//! Pinhole and fisheye camera models.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Intrinsic matrix without skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraMatrix {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraMatrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl CameraMatrix {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0)
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn rows(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Read fx, fy, cx, cy from a 3×3 matrix; skew is dropped.
    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Self {
        Self::new(rows[0][0], rows[1][1], rows[0][2], rows[1][2])
    }

    #[inline]
    pub fn to_pixel(&self, n: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_finite(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Lens distortion in OpenCV coefficient order.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Distortion {
    /// Rational model `k1, k2, p1, p2, k3, k4, k5, k6`.
    Pinhole([f64; 8]),
    /// Equidistant model `k1..k4`.
    Fisheye([f64; 4]),
}

impl Default for Distortion {
    fn default() -> Self {
        Distortion::Pinhole([0.0; 8])
    }
}

const UNDISTORT_ITERS: usize = 20;

impl Distortion {
    pub fn zero(fisheye: bool) -> Self {
        if fisheye {
            Distortion::Fisheye([0.0; 4])
        } else {
            Distortion::Pinhole([0.0; 8])
        }
    }

    pub fn is_fisheye(&self) -> bool {
        matches!(self, Distortion::Fisheye(_))
    }

    pub fn coefficients(&self) -> &[f64] {
        match self {
            Distortion::Pinhole(k) => k,
            Distortion::Fisheye(k) => k,
        }
    }

    pub fn coefficients_mut(&mut self) -> &mut [f64] {
        match self {
            Distortion::Pinhole(k) => k,
            Distortion::Fisheye(k) => k,
        }
    }

    /// Build from a coefficient list. Pinhole lists shorter than 8 are zero
    /// padded (4, 5 and 8 are the usual lengths).
    pub fn from_coefficients(coeffs: &[f64], fisheye: bool) -> Option<Self> {
        if fisheye {
            let k: [f64; 4] = coeffs.get(..4)?.try_into().ok()?;
            return Some(Distortion::Fisheye(k));
        }
        if coeffs.len() < 4 || coeffs.len() > 8 {
            return None;
        }
        let mut k = [0.0; 8];
        k[..coeffs.len()].copy_from_slice(coeffs);
        Some(Distortion::Pinhole(k))
    }

    pub fn is_finite(&self) -> bool {
        self.coefficients().iter().all(|v| v.is_finite())
    }

    /// Apply distortion to a normalized image point.
    pub fn distort(&self, n: Point2<f64>) -> Point2<f64> {
        match self {
            Distortion::Pinhole(k) => {
                let (x, y) = (n.x, n.y);
                let r2 = x * x + y * y;
                let r4 = r2 * r2;
                let r6 = r4 * r2;
                let num = 1.0 + k[0] * r2 + k[1] * r4 + k[4] * r6;
                let den = 1.0 + k[5] * r2 + k[6] * r4 + k[7] * r6;
                let radial = num / den;
                let xy = x * y;
                Point2::new(
                    x * radial + 2.0 * k[2] * xy + k[3] * (r2 + 2.0 * x * x),
                    y * radial + k[2] * (r2 + 2.0 * y * y) + 2.0 * k[3] * xy,
                )
            }
            Distortion::Fisheye(k) => {
                let r = (n.x * n.x + n.y * n.y).sqrt();
                if r < 1e-10 {
                    return n;
                }
                let theta = r.atan();
                let t2 = theta * theta;
                let theta_d =
                    theta * (1.0 + t2 * (k[0] + t2 * (k[1] + t2 * (k[2] + t2 * k[3]))));
                let s = theta_d / r;
                Point2::new(n.x * s, n.y * s)
            }
        }
    }

    /// Invert [`Distortion::distort`] iteratively.
    pub fn undistort(&self, d: Point2<f64>) -> Point2<f64> {
        match self {
            Distortion::Pinhole(k) => {
                let (mut x, mut y) = (d.x, d.y);
                for _ in 0..UNDISTORT_ITERS {
                    let r2 = x * x + y * y;
                    let r4 = r2 * r2;
                    let r6 = r4 * r2;
                    let icdist = (1.0 + k[5] * r2 + k[6] * r4 + k[7] * r6)
                        / (1.0 + k[0] * r2 + k[1] * r4 + k[4] * r6);
                    if !icdist.is_finite() || icdist <= 0.0 {
                        return d;
                    }
                    let dx = 2.0 * k[2] * x * y + k[3] * (r2 + 2.0 * x * x);
                    let dy = k[2] * (r2 + 2.0 * y * y) + 2.0 * k[3] * x * y;
                    x = (d.x - dx) * icdist;
                    y = (d.y - dy) * icdist;
                }
                Point2::new(x, y)
            }
            Distortion::Fisheye(k) => {
                let theta_d = (d.x * d.x + d.y * d.y).sqrt().min(std::f64::consts::FRAC_PI_2);
                if theta_d < 1e-10 {
                    return d;
                }
                // Newton on theta * (1 + k1 θ² + ...) = theta_d.
                let mut theta = theta_d;
                for _ in 0..UNDISTORT_ITERS {
                    let t2 = theta * theta;
                    let t4 = t2 * t2;
                    let t6 = t4 * t2;
                    let t8 = t6 * t2;
                    let f = theta * (1.0 + k[0] * t2 + k[1] * t4 + k[2] * t6 + k[3] * t8) - theta_d;
                    let df = 1.0 + 3.0 * k[0] * t2 + 5.0 * k[1] * t4 + 7.0 * k[2] * t6 + 9.0 * k[3] * t8;
                    if df.abs() < 1e-12 {
                        break;
                    }
                    let step = f / df;
                    theta -= step;
                    if step.abs() < 1e-12 {
                        break;
                    }
                }
                let s = theta.tan() / theta_d;
                Point2::new(d.x * s, d.y * s)
            }
        }
    }
}

/// Rotation vector (axis times angle) to rotation matrix.
pub fn rodrigues(rvec: &Vector3<f64>) -> Rotation3<f64> {
    Rotation3::from_scaled_axis(*rvec)
}

/// Rotation matrix to rotation vector.
///
/// Accepts matrices that are orthonormal only up to rounding, whose trace can
/// exceed 3 near the identity.
pub fn rotation_to_rvec(r: &Rotation3<f64>) -> Vector3<f64> {
    let m = r.matrix();
    let skew = 0.5 * Vector3::new(m[(2, 1)] - m[(1, 2)], m[(0, 2)] - m[(2, 0)], m[(1, 0)] - m[(0, 1)]);
    let cos = ((m.trace() - 1.0) * 0.5).clamp(-1.0, 1.0);
    if 1.0 - cos < 1e-10 {
        // sin(θ)·axis ≈ θ·axis
        return skew;
    }
    UnitQuaternion::from_rotation_matrix(r).scaled_axis()
}

/// Project object points through pose, intrinsics and distortion.
pub fn project_points(
    object: &[Point3<f64>],
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    camera: &CameraMatrix,
    dist: &Distortion,
) -> Vec<Point2<f64>> {
    let r = rodrigues(rvec);
    object
        .iter()
        .map(|p| project_point(&r, tvec, camera, dist, p))
        .collect()
}

#[inline]
pub(crate) fn project_point(
    r: &Rotation3<f64>,
    t: &Vector3<f64>,
    camera: &CameraMatrix,
    dist: &Distortion,
    p: &Point3<f64>,
) -> Point2<f64> {
    let pc = r * p.coords + t;
    let z = if pc.z.abs() < 1e-12 { 1e-12 } else { pc.z };
    let n = Point2::new(pc.x / z, pc.y / z);
    camera.to_pixel(dist.distort(n))
}

/// Map a distorted pixel to its undistorted normalized coordinates.
pub fn undistort_point(p: Point2<f64>, camera: &CameraMatrix, dist: &Distortion) -> Point2<f64> {
    dist.undistort(camera.to_normalized(p))
}
