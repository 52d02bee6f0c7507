//! Lens undistortion of whole frames.

use image::{Rgb, RgbImage};
use markercal_core::ImageSize;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::camera::{CameraMatrix, Distortion};

/// For every destination pixel, the source position to sample.
#[derive(Clone, Debug)]
pub struct UndistortMap {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

/// Build the map that renders an undistorted image with intrinsics
/// `new_camera` from a frame taken with `camera` and `dist`.
pub fn init_undistort_rectify_map(
    camera: &CameraMatrix,
    dist: &Distortion,
    new_camera: &CameraMatrix,
    size: ImageSize,
) -> UndistortMap {
    let n = (size.width as usize) * (size.height as usize);
    let mut map_x = Vec::with_capacity(n);
    let mut map_y = Vec::with_capacity(n);
    for v in 0..size.height {
        for u in 0..size.width {
            let norm = new_camera.to_normalized(Point2::new(u as f64, v as f64));
            let src = camera.to_pixel(dist.distort(norm));
            map_x.push(src.x as f32);
            map_y.push(src.y as f32);
        }
    }
    UndistortMap {
        width: size.width,
        height: size.height,
        map_x,
        map_y,
    }
}

/// Bilinear remap; samples outside the source are black.
#[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
pub fn remap(src: &RgbImage, map: &UndistortMap) -> RgbImage {
    let mut out = RgbImage::new(map.width, map.height);
    let (sw, sh) = (src.width() as f32, src.height() as f32);
    for (i, px) in out.pixels_mut().enumerate() {
        let (x, y) = (map.map_x[i], map.map_y[i]);
        if !(x >= 0.0 && y >= 0.0 && x <= sw - 1.0 && y <= sh - 1.0) {
            continue;
        }
        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(src.width() - 1);
        let y1 = (y0 + 1).min(src.height() - 1);
        let (fx, fy) = (x - x0 as f32, y - y0 as f32);
        let (p00, p10) = (src.get_pixel(x0, y0), src.get_pixel(x1, y0));
        let (p01, p11) = (src.get_pixel(x0, y1), src.get_pixel(x1, y1));
        let mut v = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            v[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
        *px = Rgb(v);
    }
    out
}

/// Undistort a frame keeping the original intrinsics.
pub fn undistort_image(frame: &RgbImage, camera: &CameraMatrix, dist: &Distortion) -> RgbImage {
    let size = ImageSize::new(frame.width(), frame.height());
    remap(frame, &init_undistort_rectify_map(camera, dist, camera, size))
}

const GRID: usize = 9;

/// New intrinsics for undistorted output. `alpha = 0` keeps only valid
/// pixels, `alpha = 1` keeps every source pixel.
pub fn get_optimal_new_camera_matrix(
    camera: &CameraMatrix,
    dist: &Distortion,
    size: ImageSize,
    alpha: f64,
) -> CameraMatrix {
    let (w, h) = (size.width as f64, size.height as f64);
    let mut pts = Vec::with_capacity(GRID * GRID);
    for y in 0..GRID {
        for x in 0..GRID {
            let p = Point2::new(
                x as f64 * (w - 1.0) / (GRID - 1) as f64,
                y as f64 * (h - 1.0) / (GRID - 1) as f64,
            );
            pts.push(dist.undistort(camera.to_normalized(p)));
        }
    }
    let at = |x: usize, y: usize| pts[y * GRID + x];

    let (mut ox0, mut oy0) = (f64::MAX, f64::MAX);
    let (mut ox1, mut oy1) = (f64::MIN, f64::MIN);
    for p in &pts {
        ox0 = ox0.min(p.x);
        oy0 = oy0.min(p.y);
        ox1 = ox1.max(p.x);
        oy1 = oy1.max(p.y);
    }
    let (mut ix0, mut iy0) = (f64::MIN, f64::MIN);
    let (mut ix1, mut iy1) = (f64::MAX, f64::MAX);
    for k in 0..GRID {
        ix0 = ix0.max(at(0, k).x);
        ix1 = ix1.min(at(GRID - 1, k).x);
        iy0 = iy0.max(at(k, 0).y);
        iy1 = iy1.min(at(k, GRID - 1).y);
    }

    let alpha = alpha.clamp(0.0, 1.0);
    let fx0 = (w - 1.0) / (ix1 - ix0);
    let fy0 = (h - 1.0) / (iy1 - iy0);
    let fx1 = (w - 1.0) / (ox1 - ox0);
    let fy1 = (h - 1.0) / (oy1 - oy0);
    let k = CameraMatrix::new(
        fx0 * (1.0 - alpha) + fx1 * alpha,
        fy0 * (1.0 - alpha) + fy1 * alpha,
        -fx0 * ix0 * (1.0 - alpha) - fx1 * ox0 * alpha,
        -fy0 * iy0 * (1.0 - alpha) - fy1 * oy0 * alpha,
    );
    if k.is_finite() {
        k
    } else {
        *camera
    }
}

/// New intrinsics for an undistorted fisheye view. `balance` blends the
/// focal that keeps only valid pixels (0) with the one that keeps the
/// whole frame (1).
pub fn estimate_new_camera_matrix_fisheye(
    camera: &CameraMatrix,
    dist: &Distortion,
    size: ImageSize,
    balance: f64,
) -> CameraMatrix {
    let (w, h) = (size.width as f64, size.height as f64);
    let balance = balance.clamp(0.0, 1.0);
    let edges = [
        Point2::new(w / 2.0, 0.0),
        Point2::new(w, h / 2.0),
        Point2::new(w / 2.0, h),
        Point2::new(0.0, h / 2.0),
    ];
    let aspect = camera.fx / camera.fy;
    let pts: Vec<Point2<f64>> = edges
        .iter()
        .map(|p| {
            let n = dist.undistort(camera.to_normalized(*p));
            Point2::new(n.x, n.y * aspect)
        })
        .collect();
    let cn = Point2::new(
        pts.iter().map(|p| p.x).sum::<f64>() / 4.0,
        pts.iter().map(|p| p.y).sum::<f64>() / 4.0,
    );
    let minx = pts.iter().map(|p| p.x).fold(f64::MAX, f64::min);
    let maxx = pts.iter().map(|p| p.x).fold(f64::MIN, f64::max);
    let miny = pts.iter().map(|p| p.y).fold(f64::MAX, f64::min);
    let maxy = pts.iter().map(|p| p.y).fold(f64::MIN, f64::max);

    let f = [
        w * 0.5 / (cn.x - minx),
        w * 0.5 / (maxx - cn.x),
        h * 0.5 * aspect / (cn.y - miny),
        h * 0.5 * aspect / (maxy - cn.y),
    ];
    let fmin = f.iter().copied().fold(f64::MAX, f64::min);
    let fmax = f.iter().copied().fold(f64::MIN, f64::max);
    let focal = balance * fmin + (1.0 - balance) * fmax;

    let k = CameraMatrix::new(
        focal,
        focal / aspect,
        -cn.x * focal + w * 0.5,
        (-cn.y * focal + h * aspect * 0.5) / aspect,
    );
    if k.is_finite() {
        k
    } else {
        *camera
    }
}
