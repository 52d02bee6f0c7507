//! Intrinsic calibration from views of a planar target.
//!
//! 1. Per-view homographies from the board plane to the image.
//! 2. Closed-form intrinsics (Zhang) or, with a fixed principal point or
//!    too few views, a focal estimate with the center at the image middle.
//! 3. Per-view poses from the homography, refined individually.
//! 4. Joint Levenberg–Marquardt over the free intrinsics, the distortion
//!    and every pose. Fixed parameters are left out of the vector.

use markercal_core::{estimate_homography, HomographyError, ImageSize};
use nalgebra::{DMatrix, DVector, Matrix2, Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::{project_point, rotation_to_rvec, CameraMatrix, Distortion};
use crate::flags::{self, fisheye as fe, pinhole as ph};
use crate::lm::{levenberg_marquardt, LeastSquaresProblem, LmOptions};

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("no views to calibrate from")]
    NoViews,
    #[error("view {view}: {objects} object points but {images} image points")]
    MismatchedPoints {
        view: usize,
        objects: usize,
        images: usize,
    },
    #[error("view {0} has fewer than 4 points")]
    TooFewPoints(usize),
    #[error("object points of view {0} are not planar (z != 0)")]
    NonPlanarTarget(usize),
    #[error("image size is empty")]
    EmptyImage,
    #[error("aspect ratio must be positive, got {0}")]
    InvalidAspectRatio(f64),
    #[error("view {view}: {source}")]
    Homography {
        view: usize,
        #[source]
        source: HomographyError,
    },
    #[error("could not recover a pose for view {0}")]
    Pose(usize),
    #[error("calibration produced non-finite values")]
    NonFinite,
}

/// Result of a calibration run.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationOutcome {
    /// Root mean square reprojection error in pixels.
    pub rms: f64,
    pub camera_matrix: CameraMatrix,
    pub distortion: Distortion,
    pub rvecs: Vec<Vector3<f64>>,
    pub tvecs: Vec<Vector3<f64>>,
}

/// True when every value is finite.
pub fn check_range(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

struct View {
    object: Vec<Point3<f64>>,
    image: Vec<Point2<f64>>,
}

fn prepare_views(
    objects: &[Vec<Point3<f32>>],
    images: &[Vec<Point2<f32>>],
    size: ImageSize,
) -> Result<Vec<View>, CalibrationError> {
    if objects.is_empty() || images.is_empty() {
        return Err(CalibrationError::NoViews);
    }
    if size.is_empty() {
        return Err(CalibrationError::EmptyImage);
    }
    if objects.len() != images.len() {
        return Err(CalibrationError::MismatchedPoints {
            view: objects.len().min(images.len()),
            objects: objects.len(),
            images: images.len(),
        });
    }
    objects
        .iter()
        .zip(images)
        .enumerate()
        .map(|(view, (o, i))| {
            if o.len() != i.len() {
                return Err(CalibrationError::MismatchedPoints {
                    view,
                    objects: o.len(),
                    images: i.len(),
                });
            }
            if o.len() < 4 {
                return Err(CalibrationError::TooFewPoints(view));
            }
            if o.iter().any(|p| p.z.abs() > 1e-6) {
                return Err(CalibrationError::NonPlanarTarget(view));
            }
            Ok(View {
                object: o.iter().map(|p| p.cast::<f64>()).collect(),
                image: i.iter().map(|p| p.cast::<f64>()).collect(),
            })
        })
        .collect()
}

fn plane_points(view: &View) -> Vec<Point2<f64>> {
    view.object.iter().map(|p| Point2::new(p.x, p.y)).collect()
}

fn image_homographies(views: &[View]) -> Result<Vec<Matrix3<f64>>, CalibrationError> {
    views
        .iter()
        .enumerate()
        .map(|(i, v)| {
            estimate_homography(&plane_points(v), &v.image)
                .map(|h| h.h)
                .map_err(|source| CalibrationError::Homography { view: i, source })
        })
        .collect()
}

/// Image normalization `p' = (p − c) / s` as a matrix.
fn normalizer(size: ImageSize) -> (Matrix3<f64>, f64, f64, f64) {
    let s = size.width.max(size.height) as f64 / 2.0;
    let cx = (size.width as f64 - 1.0) / 2.0;
    let cy = (size.height as f64 - 1.0) / 2.0;
    let n = Matrix3::new(1.0 / s, 0.0, -cx / s, 0.0, 1.0 / s, -cy / s, 0.0, 0.0, 1.0);
    (n, s, cx, cy)
}

fn unit(h: Matrix3<f64>) -> Matrix3<f64> {
    let n = h.norm();
    if n > 0.0 {
        h / n
    } else {
        h
    }
}

/// Zhang's closed form with zero skew, on normalized homographies.
fn zhang_intrinsics(homographies: &[Matrix3<f64>], size: ImageSize) -> Option<CameraMatrix> {
    let (norm, s, c0x, c0y) = normalizer(size);
    let rows = 2 * homographies.len() + 1;
    let mut v = DMatrix::<f64>::zeros(rows, 6);
    let vij = |h: &Matrix3<f64>, i: usize, j: usize| -> [f64; 6] {
        let (a, b) = (h.column(i), h.column(j));
        [
            a[0] * b[0],
            a[0] * b[1] + a[1] * b[0],
            a[1] * b[1],
            a[2] * b[0] + a[0] * b[2],
            a[2] * b[1] + a[1] * b[2],
            a[2] * b[2],
        ]
    };
    for (k, h) in homographies.iter().enumerate() {
        let hn = unit(norm * h);
        let v12 = vij(&hn, 0, 1);
        let v11 = vij(&hn, 0, 0);
        let v22 = vij(&hn, 1, 1);
        for c in 0..6 {
            v[(2 * k, c)] = v12[c];
            v[(2 * k + 1, c)] = v11[c] - v22[c];
        }
    }
    // Zero skew: B12 = 0.
    v[(rows - 1, 1)] = 1.0;

    let eig = (v.transpose() * &v).symmetric_eigen();
    let (idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let mut b = eig.eigenvectors.column(idx).into_owned();
    if b[0] < 0.0 {
        b = -b;
    }
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);
    let den = b11 * b22 - b12 * b12;
    if den <= 0.0 || b11 <= 0.0 {
        return None;
    }
    let v0 = (b12 * b13 - b11 * b23) / den;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    if lambda / b11 <= 0.0 {
        return None;
    }
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / den).sqrt();
    let u0 = -b13 * alpha * alpha / lambda;

    let k = CameraMatrix::new(alpha * s, beta * s, u0 * s + c0x, v0 * s + c0y);
    plausible(&k, size).then_some(k)
}

/// Focal lengths from vanishing-point constraints with the principal point
/// at the image center.
fn centered_intrinsics(
    homographies: &[Matrix3<f64>],
    size: ImageSize,
    aspect: Option<f64>,
) -> CameraMatrix {
    let (norm, s, cx, cy) = normalizer(size);
    let mut ata = Matrix2::<f64>::zeros();
    let mut atb = Vector2::<f64>::zeros();
    for h in homographies {
        let hn = unit(norm * h);
        let (h1, h2) = (hn.column(0), hn.column(1));
        let eqs = [
            ([h1[0] * h2[0], h1[1] * h2[1]], -h1[2] * h2[2]),
            (
                [h1[0] * h1[0] - h2[0] * h2[0], h1[1] * h1[1] - h2[1] * h2[1]],
                -(h1[2] * h1[2] - h2[2] * h2[2]),
            ),
        ];
        for (a, rhs) in eqs {
            let row = Vector2::new(a[0], a[1]);
            ata += row * row.transpose();
            atb += row * rhs;
        }
    }

    let fallback = size.width.max(size.height) as f64;
    let (fx, fy) = match aspect {
        Some(r) => {
            // a = 1/fx² = b / r², one unknown b = 1/fy².
            let g = Vector2::new(1.0 / (r * r), 1.0);
            let num = g.dot(&atb);
            let den = g.dot(&(ata * g));
            let b = num / den;
            if den > 0.0 && b > 0.0 {
                let fy = s / b.sqrt();
                (r * fy, fy)
            } else {
                (r * fallback, fallback)
            }
        }
        None => match ata.try_inverse().map(|inv| inv * atb) {
            Some(x) if x[0] > 0.0 && x[1] > 0.0 => (s / x[0].sqrt(), s / x[1].sqrt()),
            _ => (fallback, fallback),
        },
    };
    let k = CameraMatrix::new(fx, fy, cx, cy);
    if plausible(&k, size) {
        k
    } else {
        let f = fallback;
        CameraMatrix::new(aspect.unwrap_or(1.0) * f, f, cx, cy)
    }
}

fn plausible(k: &CameraMatrix, size: ImageSize) -> bool {
    let m = size.width.max(size.height) as f64;
    k.is_finite()
        && k.fx > 0.05 * m
        && k.fy > 0.05 * m
        && k.fx < 50.0 * m
        && k.fy < 50.0 * m
        && k.cx > -m
        && k.cx < 2.0 * m
        && k.cy > -m
        && k.cy < 2.0 * m
}

/// Pose `[R|t]` from a homography between the board plane and undistorted
/// normalized image coordinates.
fn pose_from_homography(h: &Matrix3<f64>) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let (h1, h2, h3) = (
        h.column(0).into_owned(),
        h.column(1).into_owned(),
        h.column(2).into_owned(),
    );
    let scale = 0.5 * (h1.norm() + h2.norm());
    if scale <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / scale;
    if (h3 * lambda).z < 0.0 {
        lambda = -lambda;
    }
    let r1 = h1 * lambda;
    let r2 = h2 * lambda;
    let t = h3 * lambda;
    let r3 = r1.cross(&r2);
    let m = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = m.svd(true, true);
    let (u, vt) = (svd.u?, svd.v_t?);
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * vt;
    }
    let rvec = rotation_to_rvec(&Rotation3::from_matrix_unchecked(r));
    (rvec.iter().chain(t.iter()).all(|v| v.is_finite())).then_some((rvec, t))
}

struct PoseProblem<'a> {
    view: &'a View,
    camera: CameraMatrix,
    dist: Distortion,
}

impl LeastSquaresProblem for PoseProblem<'_> {
    fn residuals(&self, p: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(2 * self.view.object.len());
        view_residuals(
            &self.camera,
            &self.dist,
            &Vector3::new(p[0], p[1], p[2]),
            &Vector3::new(p[3], p[4], p[5]),
            self.view,
            out.as_mut_slice(),
        );
        out
    }
}

fn view_residuals(
    camera: &CameraMatrix,
    dist: &Distortion,
    rvec: &Vector3<f64>,
    tvec: &Vector3<f64>,
    view: &View,
    out: &mut [f64],
) {
    let r = Rotation3::from_scaled_axis(*rvec);
    for (k, (o, i)) in view.object.iter().zip(&view.image).enumerate() {
        let p = project_point(&r, tvec, camera, dist, o);
        out[2 * k] = p.x - i.x;
        out[2 * k + 1] = p.y - i.y;
    }
}

/// Initial pose of one view for known intrinsics, refined on its own.
fn estimate_pose(
    view: &View,
    index: usize,
    camera: &CameraMatrix,
    dist: &Distortion,
) -> Result<(Vector3<f64>, Vector3<f64>), CalibrationError> {
    let normalized: Vec<Point2<f64>> = view
        .image
        .iter()
        .map(|p| dist.undistort(camera.to_normalized(*p)))
        .collect();
    let h = estimate_homography(&plane_points(view), &normalized)
        .map_err(|source| CalibrationError::Homography {
            view: index,
            source,
        })?;
    let (rvec, tvec) = pose_from_homography(&h.h).ok_or(CalibrationError::Pose(index))?;

    let problem = PoseProblem {
        view,
        camera: *camera,
        dist: *dist,
    };
    let x0 = DVector::from_iterator(6, rvec.iter().chain(tvec.iter()).copied());
    let report = levenberg_marquardt(
        &problem,
        x0,
        &LmOptions {
            max_iters: 20,
            ..LmOptions::default()
        },
    );
    let p = &report.params;
    Ok((Vector3::new(p[0], p[1], p[2]), Vector3::new(p[3], p[4], p[5])))
}

/// Which intrinsic and distortion entries are optimized.
#[derive(Clone, Debug)]
struct Layout {
    /// Fixed fx/fy ratio; only fy is optimized.
    aspect: Option<f64>,
    principal_point: bool,
    dist_free: Vec<bool>,
}

impl Layout {
    fn pinhole(flags: i32, aspect_ratio: f64) -> Self {
        let rational = flags::has(flags, ph::RATIONAL_MODEL);
        let zero_tangent = flags::has(flags, ph::ZERO_TANGENT_DIST);
        let dist_free = vec![
            !flags::has(flags, ph::FIX_K1),
            !flags::has(flags, ph::FIX_K2),
            !zero_tangent,
            !zero_tangent,
            !flags::has(flags, ph::FIX_K3),
            rational && !flags::has(flags, ph::FIX_K4),
            rational && !flags::has(flags, ph::FIX_K5),
            rational && !flags::has(flags, ph::FIX_K6),
        ];
        Self {
            aspect: flags::has(flags, ph::FIX_ASPECT_RATIO).then_some(aspect_ratio),
            principal_point: !flags::has(flags, ph::FIX_PRINCIPAL_POINT),
            dist_free,
        }
    }

    fn fisheye(flags: i32) -> Self {
        Self {
            aspect: None,
            principal_point: !flags::has(flags, fe::FIX_PRINCIPAL_POINT),
            dist_free: vec![
                !flags::has(flags, fe::FIX_K1),
                !flags::has(flags, fe::FIX_K2),
                !flags::has(flags, fe::FIX_K3),
                !flags::has(flags, fe::FIX_K4),
            ],
        }
    }

    fn intrinsic_len(&self) -> usize {
        let focal = if self.aspect.is_some() { 1 } else { 2 };
        let pp = if self.principal_point { 2 } else { 0 };
        focal + pp + self.dist_free.iter().filter(|&&f| f).count()
    }

    fn pack(&self, camera: &CameraMatrix, dist: &Distortion, out: &mut Vec<f64>) {
        if self.aspect.is_some() {
            out.push(camera.fy);
        } else {
            out.push(camera.fx);
            out.push(camera.fy);
        }
        if self.principal_point {
            out.push(camera.cx);
            out.push(camera.cy);
        }
        for (k, &free) in dist.coefficients().iter().zip(&self.dist_free) {
            if free {
                out.push(*k);
            }
        }
    }

    /// Inverse of [`Layout::pack`]; fixed entries come from the templates.
    fn unpack(
        &self,
        p: &[f64],
        camera: &CameraMatrix,
        dist: &Distortion,
    ) -> (CameraMatrix, Distortion) {
        let mut it = p.iter().copied();
        let mut cam = *camera;
        match self.aspect {
            Some(r) => {
                cam.fy = it.next().unwrap_or(cam.fy);
                cam.fx = r * cam.fy;
            }
            None => {
                cam.fx = it.next().unwrap_or(cam.fx);
                cam.fy = it.next().unwrap_or(cam.fy);
            }
        }
        if self.principal_point {
            cam.cx = it.next().unwrap_or(cam.cx);
            cam.cy = it.next().unwrap_or(cam.cy);
        }
        let mut d = *dist;
        for (k, &free) in d.coefficients_mut().iter_mut().zip(&self.dist_free) {
            if free {
                *k = it.next().unwrap_or(*k);
            }
        }
        (cam, d)
    }
}

struct JointProblem<'a> {
    views: &'a [View],
    layout: &'a Layout,
    camera: CameraMatrix,
    dist: Distortion,
    offsets: Vec<usize>,
    residual_len: usize,
}

impl<'a> JointProblem<'a> {
    fn new(views: &'a [View], layout: &'a Layout, camera: CameraMatrix, dist: Distortion) -> Self {
        let mut offsets = Vec::with_capacity(views.len());
        let mut acc = 0;
        for v in views {
            offsets.push(acc);
            acc += 2 * v.object.len();
        }
        Self {
            views,
            layout,
            camera,
            dist,
            offsets,
            residual_len: acc,
        }
    }

    fn pose(p: &[f64]) -> (Vector3<f64>, Vector3<f64>) {
        (
            Vector3::new(p[0], p[1], p[2]),
            Vector3::new(p[3], p[4], p[5]),
        )
    }
}

impl LeastSquaresProblem for JointProblem<'_> {
    fn residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        let n_intr = self.layout.intrinsic_len();
        let (cam, dist) = self
            .layout
            .unpack(&x.as_slice()[..n_intr], &self.camera, &self.dist);
        let mut out = DVector::zeros(self.residual_len);
        for (v, view) in self.views.iter().enumerate() {
            let base = n_intr + 6 * v;
            let (rvec, tvec) = Self::pose(&x.as_slice()[base..base + 6]);
            let start = self.offsets[v];
            let end = start + 2 * view.object.len();
            view_residuals(
                &cam,
                &dist,
                &rvec,
                &tvec,
                view,
                &mut out.as_mut_slice()[start..end],
            );
        }
        out
    }

    /// Pose parameters only touch their own view's rows.
    fn jacobian(&self, x: &DVector<f64>, r: &DVector<f64>) -> DMatrix<f64> {
        let n_intr = self.layout.intrinsic_len();
        let mut jac = DMatrix::zeros(r.len(), x.len());
        let mut xp = x.clone();
        for j in 0..n_intr {
            let h = f64::EPSILON.sqrt() * x[j].abs().max(1.0);
            xp[j] = x[j] + h;
            let rp = self.residuals(&xp);
            xp[j] = x[j];
            jac.set_column(j, &((rp - r) / h));
        }

        let (cam, dist) = self
            .layout
            .unpack(&x.as_slice()[..n_intr], &self.camera, &self.dist);
        let mut buf = Vec::new();
        for (v, view) in self.views.iter().enumerate() {
            let base = n_intr + 6 * v;
            let start = self.offsets[v];
            let rows = 2 * view.object.len();
            buf.resize(rows, 0.0);
            for k in 0..6 {
                let mut pose = [0.0; 6];
                pose.copy_from_slice(&x.as_slice()[base..base + 6]);
                let h = f64::EPSILON.sqrt() * pose[k].abs().max(1.0);
                pose[k] += h;
                let (rvec, tvec) = Self::pose(&pose);
                view_residuals(&cam, &dist, &rvec, &tvec, view, &mut buf);
                for row in 0..rows {
                    jac[(start + row, base + k)] = (buf[row] - r[start + row]) / h;
                }
            }
        }
        jac
    }
}

fn joint_refine(
    views: &[View],
    layout: &Layout,
    camera: CameraMatrix,
    dist: Distortion,
    poses: &[(Vector3<f64>, Vector3<f64>)],
) -> (CameraMatrix, Distortion, Vec<(Vector3<f64>, Vector3<f64>)>, f64) {
    let mut x0 = Vec::with_capacity(layout.intrinsic_len() + 6 * poses.len());
    layout.pack(&camera, &dist, &mut x0);
    for (r, t) in poses {
        x0.extend(r.iter().chain(t.iter()));
    }
    let problem = JointProblem::new(views, layout, camera, dist);
    let report = levenberg_marquardt(&problem, DVector::from_vec(x0), &LmOptions::default());
    log::debug!(
        "calibration: joint refinement {:?} after {} iterations",
        report.termination,
        report.iterations
    );

    let n_intr = layout.intrinsic_len();
    let (cam, d) = layout.unpack(&report.params.as_slice()[..n_intr], &camera, &dist);
    let poses = (0..views.len())
        .map(|v| JointProblem::pose(&report.params.as_slice()[n_intr + 6 * v..n_intr + 6 * v + 6]))
        .collect();
    (cam, d, poses, report.cost)
}

fn total_points(views: &[View]) -> usize {
    views.iter().map(|v| v.object.len()).sum()
}

fn outcome(
    camera: CameraMatrix,
    distortion: Distortion,
    poses: Vec<(Vector3<f64>, Vector3<f64>)>,
    cost: f64,
    n: usize,
) -> Result<CalibrationOutcome, CalibrationError> {
    let rms = (cost / n as f64).sqrt();
    let finite = camera.is_finite()
        && distortion.is_finite()
        && rms.is_finite()
        && poses
            .iter()
            .all(|(r, t)| check_range(r.as_slice()) && check_range(t.as_slice()));
    if !finite {
        return Err(CalibrationError::NonFinite);
    }
    let (rvecs, tvecs) = poses.into_iter().unzip();
    Ok(CalibrationOutcome {
        rms,
        camera_matrix: camera,
        distortion,
        rvecs,
        tvecs,
    })
}

fn initial_intrinsics(
    views: &[View],
    size: ImageSize,
    fix_principal_point: bool,
    aspect: Option<f64>,
) -> Result<CameraMatrix, CalibrationError> {
    let homographies = image_homographies(views)?;
    let zhang = if !fix_principal_point && homographies.len() >= 3 {
        zhang_intrinsics(&homographies, size)
    } else {
        None
    };
    let k = match zhang {
        Some(mut k) => {
            if let Some(r) = aspect {
                let fy = (k.fx + k.fy) / (r + 1.0);
                k.fy = fy;
                k.fx = r * fy;
            }
            k
        }
        None => centered_intrinsics(&homographies, size, aspect),
    };
    log::debug!(
        "calibration: initial fx {:.1} fy {:.1} cx {:.1} cy {:.1}",
        k.fx,
        k.fy,
        k.cx,
        k.cy
    );
    Ok(k)
}

/// Calibrate a pinhole camera with the rational distortion model.
///
/// `flags` uses [`crate::flags::pinhole`]. With `FIX_ASPECT_RATIO`,
/// `aspect_ratio` is the fixed `fx/fy`. The 4th to 6th coefficients are
/// only estimated with `RATIONAL_MODEL`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(views = object_points.len(), flags))
)]
pub fn calibrate_camera(
    object_points: &[Vec<Point3<f32>>],
    image_points: &[Vec<Point2<f32>>],
    image_size: ImageSize,
    flags: i32,
    aspect_ratio: f64,
) -> Result<CalibrationOutcome, CalibrationError> {
    let views = prepare_views(object_points, image_points, image_size)?;
    let layout = Layout::pinhole(flags, aspect_ratio);
    if let Some(r) = layout.aspect {
        if !(r > 0.0 && r.is_finite()) {
            return Err(CalibrationError::InvalidAspectRatio(r));
        }
    }

    let camera = initial_intrinsics(&views, image_size, !layout.principal_point, layout.aspect)?;
    let dist = Distortion::zero(false);
    let poses = views
        .iter()
        .enumerate()
        .map(|(i, v)| estimate_pose(v, i, &camera, &dist))
        .collect::<Result<Vec<_>, _>>()?;

    let (camera, dist, poses, cost) = joint_refine(&views, &layout, camera, dist, &poses);
    let out = outcome(camera, dist, poses, cost, total_points(&views))?;
    log::info!("calibration: rms {:.4}px over {} views", out.rms, views.len());
    Ok(out)
}

/// Calibrate an equidistant fisheye camera.
///
/// `flags` uses [`crate::flags::fisheye`]; skew is never modelled. With
/// `RECOMPUTE_EXTRINSIC` every pose is re-estimated for the refined
/// intrinsics and the joint refinement runs once more.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip_all, fields(views = object_points.len(), flags))
)]
pub fn calibrate_fisheye(
    object_points: &[Vec<Point3<f32>>],
    image_points: &[Vec<Point2<f32>>],
    image_size: ImageSize,
    flags: i32,
) -> Result<CalibrationOutcome, CalibrationError> {
    let views = prepare_views(object_points, image_points, image_size)?;
    let layout = Layout::fisheye(flags);

    let camera = initial_intrinsics(&views, image_size, !layout.principal_point, None)?;
    let dist = Distortion::zero(true);
    let poses = views
        .iter()
        .enumerate()
        .map(|(i, v)| estimate_pose(v, i, &camera, &dist))
        .collect::<Result<Vec<_>, _>>()?;

    let (mut camera, mut dist, mut poses, mut cost) =
        joint_refine(&views, &layout, camera, dist, &poses);
    if flags::has(flags, fe::RECOMPUTE_EXTRINSIC) {
        poses = views
            .iter()
            .enumerate()
            .map(|(i, v)| estimate_pose(v, i, &camera, &dist))
            .collect::<Result<Vec<_>, _>>()?;
        (camera, dist, poses, cost) = joint_refine(&views, &layout, camera, dist, &poses);
    }
    let out = outcome(camera, dist, poses, cost, total_points(&views))?;
    log::info!(
        "fisheye calibration: rms {:.4}px over {} views",
        out.rms,
        views.len()
    );
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::synthetic::{views, views_at};
    use super::*;
    use approx::assert_relative_eq;

    const SIZE: ImageSize = ImageSize {
        width: 640,
        height: 480,
    };

    #[test]
    fn recovers_pinhole_intrinsics_and_distortion() {
        let truth = CameraMatrix::new(800.0, 780.0, 322.0, 236.0);
        let dist = Distortion::Pinhole([-0.12, 0.08, 0.001, -0.0015, 0.0, 0.0, 0.0, 0.0]);
        let (obj, img) = views(&truth, &dist);

        let out = calibrate_camera(&obj, &img, SIZE, ph::FIX_K3, 0.0).expect("calibrated");
        assert!(out.rms < 0.01, "rms {}", out.rms);
        assert_relative_eq!(out.camera_matrix.fx, truth.fx, max_relative = 2e-3);
        assert_relative_eq!(out.camera_matrix.fy, truth.fy, max_relative = 2e-3);
        assert_relative_eq!(out.camera_matrix.cx, truth.cx, epsilon = 1.0);
        assert_relative_eq!(out.camera_matrix.cy, truth.cy, epsilon = 1.0);
        let k = out.distortion.coefficients();
        assert_relative_eq!(k[0], -0.12, epsilon = 5e-3);
        assert_relative_eq!(k[2], 0.001, epsilon = 5e-4);
        assert_eq!(k[4], 0.0);
        assert_eq!(out.rvecs.len(), 7);
    }

    #[test]
    fn fixed_principal_point_and_aspect_ratio_are_respected() {
        let truth = CameraMatrix::new(780.0, 780.0, 319.5, 239.5);
        let dist = Distortion::Pinhole([-0.05, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let (obj, img) = views(&truth, &dist);
        let flags = ph::FIX_PRINCIPAL_POINT
            | ph::FIX_ASPECT_RATIO
            | ph::ZERO_TANGENT_DIST
            | ph::FIX_K3;

        let out = calibrate_camera(&obj, &img, SIZE, flags, 1.0).expect("calibrated");
        assert_eq!(out.camera_matrix.cx, 319.5);
        assert_eq!(out.camera_matrix.cy, 239.5);
        assert_eq!(out.camera_matrix.fx, out.camera_matrix.fy);
        assert_relative_eq!(out.camera_matrix.fx, 780.0, max_relative = 2e-3);
        let k = out.distortion.coefficients();
        assert_eq!((k[2], k[3]), (0.0, 0.0));
        assert!(out.rms < 0.01);
    }

    #[test]
    fn all_distortion_fixed_keeps_zero_coefficients() {
        let truth = CameraMatrix::new(700.0, 700.0, 320.0, 240.0);
        let (obj, img) = views(&truth, &Distortion::default());
        let flags = ph::ZERO_TANGENT_DIST | ph::FIX_K1 | ph::FIX_K2 | ph::FIX_K3;
        let out = calibrate_camera(&obj, &img, SIZE, flags, 0.0).expect("calibrated");
        assert!(out.distortion.coefficients().iter().all(|&k| k == 0.0));
        assert_relative_eq!(out.camera_matrix.fx, 700.0, max_relative = 1e-3);
    }

    #[test]
    fn recovers_fisheye_model() {
        let truth = CameraMatrix::new(300.0, 298.0, 318.0, 242.0);
        let dist = Distortion::Fisheye([0.05, -0.02, 0.0, 0.0]);
        let (obj, img) = views_at(&truth, &dist, 180.0);
        let flags = fe::RECOMPUTE_EXTRINSIC | fe::FIX_SKEW | fe::FIX_K3 | fe::FIX_K4;

        let out = calibrate_fisheye(&obj, &img, SIZE, flags).expect("calibrated");
        assert!(out.rms < 0.01, "rms {}", out.rms);
        assert!(out.distortion.is_fisheye());
        assert_relative_eq!(out.camera_matrix.fx, 300.0, max_relative = 3e-3);
        assert_relative_eq!(out.distortion.coefficients()[0], 0.05, epsilon = 5e-3);
        assert_eq!(out.distortion.coefficients()[3], 0.0);
    }

    #[test]
    fn rejects_bad_input() {
        let empty: Vec<Vec<Point3<f32>>> = Vec::new();
        assert!(matches!(
            calibrate_camera(&empty, &[], SIZE, 0, 0.0),
            Err(CalibrationError::NoViews)
        ));

        let obj = vec![vec![Point3::new(0.0f32, 0.0, 0.0); 5]];
        let img = vec![vec![Point2::new(0.0f32, 0.0); 4]];
        assert!(matches!(
            calibrate_camera(&obj, &img, SIZE, 0, 0.0),
            Err(CalibrationError::MismatchedPoints { view: 0, .. })
        ));

        let obj = vec![vec![Point3::new(0.0f32, 0.0, 1.0); 4]];
        let img = vec![vec![Point2::new(0.0f32, 0.0); 4]];
        assert!(matches!(
            calibrate_camera(&obj, &img, SIZE, 0, 0.0),
            Err(CalibrationError::NonPlanarTarget(0))
        ));

        let camera = CameraMatrix::new(700.0, 700.0, 320.0, 240.0);
        let (obj, img) = views(&camera, &Distortion::default());
        assert!(matches!(
            calibrate_camera(&obj, &img, SIZE, ph::FIX_ASPECT_RATIO, 0.0),
            Err(CalibrationError::InvalidAspectRatio(_))
        ));
    }

    #[test]
    fn pose_from_identity_homography_faces_the_camera() {
        let h = Matrix3::new(1.0, 0.0, 0.1, 0.0, 1.0, -0.2, 0.0, 0.0, 2.0);
        let (r, t) = pose_from_homography(&h).expect("pose");
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-12);
        assert_relative_eq!(t, Vector3::new(0.1, -0.2, 2.0), epsilon = 1e-12);
    }

    /// One view of a 4x3 grid, axis-aligned with the sensor.
    fn frontal_view() -> (Vec<Vec<Point3<f32>>>, Vec<Vec<Point2<f32>>>) {
        let mut obj = Vec::new();
        let mut img = Vec::new();
        for y in 0..3 {
            for x in 0..4 {
                obj.push(Point3::new(x as f32, y as f32, 0.0));
                img.push(Point2::new(100.0 + 5.0 * x as f32, 80.0 + 5.0 * y as f32));
            }
        }
        (vec![obj], vec![img])
    }

    #[test]
    fn frontal_view_calibrates() {
        let size = ImageSize::new(320, 240);
        let (obj, img) = frontal_view();

        let out = calibrate_camera(&obj, &img, size, 0, 0.0).expect("pinhole");
        assert!(out.rms < 1e-3, "rms {}", out.rms);
        assert!(out.rvecs[0].norm() < 1e-3, "rvec {:?}", out.rvecs[0]);

        let out = calibrate_fisheye(&obj, &img, size, 0).expect("fisheye");
        assert!(out.rms < 1e-3, "rms {}", out.rms);
    }

    #[test]
    fn frontal_pose_from_homography_is_finite() {
        let h = Matrix3::new(5.0, 0.0, 100.0, 0.0, 5.0, 80.0, 0.0, 0.0, 1.0) * (1.0 / 3.0);
        let (r, t) = pose_from_homography(&h).expect("pose");
        assert!(r.iter().chain(t.iter()).all(|v| v.is_finite()));
        assert_relative_eq!(r.norm(), 0.0, epsilon = 1e-9);
    }

    fn centered_truth() -> CameraMatrix {
        CameraMatrix::new(720.0, 700.0, 319.5, 239.5)
    }

    #[test]
    fn two_views_start_from_a_centered_principal_point() {
        let truth = centered_truth();
        let (obj, img) = views(&truth, &Distortion::default());
        let views = prepare_views(&obj[..2], &img[..2], SIZE).expect("views");

        let k = initial_intrinsics(&views, SIZE, false, None).expect("initial");
        assert_eq!((k.cx, k.cy), (319.5, 239.5));
        assert_relative_eq!(k.fx, truth.fx, max_relative = 1e-3);
        assert_relative_eq!(k.fy, truth.fy, max_relative = 1e-3);
    }

    #[test]
    fn two_views_with_fixed_principal_point() {
        let truth = centered_truth();
        let (obj, img) = views(&truth, &Distortion::default());
        let flags = ph::FIX_PRINCIPAL_POINT
            | ph::ZERO_TANGENT_DIST
            | ph::FIX_K1
            | ph::FIX_K2
            | ph::FIX_K3;

        let out = calibrate_camera(&obj[..2], &img[..2], SIZE, flags, 0.0).expect("calibrated");
        assert!(out.rms < 0.01, "rms {}", out.rms);
        assert_eq!((out.camera_matrix.cx, out.camera_matrix.cy), (319.5, 239.5));
        assert_relative_eq!(out.camera_matrix.fx, truth.fx, max_relative = 1e-3);
        assert_relative_eq!(out.camera_matrix.fy, truth.fy, max_relative = 1e-3);
        assert_eq!(out.rvecs.len(), 2);
    }

    #[test]
    fn single_tilted_view_with_fixed_aspect_ratio() {
        let truth = CameraMatrix::new(700.0, 700.0, 319.5, 239.5);
        let (obj, img) = views(&truth, &Distortion::default());
        let flags = ph::FIX_PRINCIPAL_POINT
            | ph::FIX_ASPECT_RATIO
            | ph::ZERO_TANGENT_DIST
            | ph::FIX_K1
            | ph::FIX_K2
            | ph::FIX_K3;

        let out = calibrate_camera(&obj[..1], &img[..1], SIZE, flags, 1.0).expect("calibrated");
        assert!(out.rms < 0.01, "rms {}", out.rms);
        assert_eq!((out.camera_matrix.cx, out.camera_matrix.cy), (319.5, 239.5));
        assert_relative_eq!(out.camera_matrix.fx, 700.0, max_relative = 1e-3);
        assert_eq!(out.camera_matrix.fx, out.camera_matrix.fy);
    }

    #[test]
    fn check_range_flags_non_finite() {
        assert!(check_range(&[1.0, -2.0]));
        assert!(!check_range(&[1.0, f64::NAN]));
        assert!(!check_range(&[f64::INFINITY]));
    }
}
