//! Reprojection error statistics.

use nalgebra::{Point2, Point3, Vector3};

use crate::camera::{project_points, CameraMatrix, Distortion};

/// Total RMS error over all points and the RMS error of each view.
///
/// Views and poses are matched by index; extra entries on either side are
/// ignored.
pub fn compute_reprojection_errors(
    object_points: &[Vec<Point3<f32>>],
    image_points: &[Vec<Point2<f32>>],
    rvecs: &[Vector3<f64>],
    tvecs: &[Vector3<f64>],
    camera: &CameraMatrix,
    dist: &Distortion,
) -> (f64, Vec<f64>) {
    let mut total_err = 0.0;
    let mut total_points = 0usize;
    let mut per_view = Vec::with_capacity(object_points.len());

    for (((obj, img), r), t) in object_points.iter().zip(image_points).zip(rvecs).zip(tvecs) {
        let obj64: Vec<Point3<f64>> = obj.iter().map(|p| p.cast()).collect();
        let projected = project_points(&obj64, r, t, camera, dist);
        let err_sq: f64 = projected
            .iter()
            .zip(img)
            .map(|(p, q)| (p - q.cast::<f64>()).norm_squared())
            .sum();
        let n = obj.len();
        per_view.push(if n > 0 { (err_sq / n as f64).sqrt() } else { 0.0 });
        total_err += err_sq;
        total_points += n;
    }

    let total = if total_points > 0 {
        (total_err / total_points as f64).sqrt()
    } else {
        0.0
    };
    (total, per_view)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn per_view_and_total_rms() {
        let cam = CameraMatrix::new(100.0, 100.0, 0.0, 0.0);
        let obj = vec![
            vec![Point3::new(0.0f32, 0.0, 0.0), Point3::new(1.0, 0.0, 0.0)],
            vec![Point3::new(0.0f32, 0.0, 0.0)],
        ];
        let r = vec![Vector3::zeros(); 2];
        let t = vec![Vector3::new(0.0, 0.0, 10.0); 2];
        // Exact projections are (0,0) and (10,0); offset them by 3 and 4 px.
        let img = vec![
            vec![Point2::new(3.0f32, 0.0), Point2::new(10.0, 4.0)],
            vec![Point2::new(0.0f32, 0.0)],
        ];
        let (total, per_view) =
            compute_reprojection_errors(&obj, &img, &r, &t, &cam, &Distortion::default());
        assert_relative_eq!(per_view[0], (25.0f64 / 2.0).sqrt(), epsilon = 1e-9);
        assert_relative_eq!(per_view[1], 0.0);
        assert_relative_eq!(total, (25.0f64 / 3.0).sqrt(), epsilon = 1e-9);
    }
}
