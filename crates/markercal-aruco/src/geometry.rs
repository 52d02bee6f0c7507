//! Polygon helpers for closed integer contours.

use nalgebra::Point2;

type Pt = (i32, i32);

#[inline]
fn dist2(a: Pt, b: Pt) -> f64 {
    let dx = (a.0 - b.0) as f64;
    let dy = (a.1 - b.1) as f64;
    dx * dx + dy * dy
}

fn farthest_from(contour: &[Pt], from: usize) -> usize {
    let origin = contour[from];
    let mut best = from;
    let mut best_d = -1.0;
    for (i, &p) in contour.iter().enumerate() {
        let d = dist2(origin, p);
        if d > best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Douglas–Peucker simplification of a closed curve.
///
/// The curve is split at two mutually distant points, which are always kept,
/// and each half is simplified so no dropped point lies farther than
/// `epsilon` from the polyline. Output follows the input orientation.
pub fn approx_poly_dp(contour: &[Pt], epsilon: f64) -> Vec<Pt> {
    let n = contour.len();
    if n < 3 {
        return contour.to_vec();
    }

    let mut a = farthest_from(contour, 0);
    let mut b = farthest_from(contour, a);
    a = farthest_from(contour, b);
    b = farthest_from(contour, a);
    if dist2(contour[a], contour[b]) <= epsilon * epsilon {
        return vec![contour[a]];
    }

    let mut keep = vec![false; n];
    keep[a] = true;
    keep[b] = true;

    // Unwrapped index ranges: (start, end) with end > start.
    let b_unwrapped = if b > a { b } else { b + n };
    let mut stack = vec![(a, b_unwrapped), (b_unwrapped, a + n)];

    while let Some((i, j)) = stack.pop() {
        if j <= i + 1 {
            continue;
        }
        let p = contour[i % n];
        let q = contour[j % n];
        let (dx, dy) = ((q.0 - p.0) as f64, (q.1 - p.1) as f64);
        let len = (dx * dx + dy * dy).sqrt();

        let mut max_d = -1.0;
        let mut max_k = i;
        for k in i + 1..j {
            let r = contour[k % n];
            let d = if len > 0.0 {
                ((r.0 - p.0) as f64 * dy - (r.1 - p.1) as f64 * dx).abs() / len
            } else {
                dist2(p, r).sqrt()
            };
            if d > max_d {
                max_d = d;
                max_k = k;
            }
        }

        if max_d > epsilon {
            keep[max_k % n] = true;
            stack.push((i, max_k));
            stack.push((max_k, j));
        }
    }

    (0..n)
        .map(|t| (a + t) % n)
        .filter(|&i| keep[i])
        .map(|i| contour[i])
        .collect()
}

pub fn perimeter(poly: &[Pt]) -> f64 {
    if poly.len() < 2 {
        return 0.0;
    }
    (0..poly.len())
        .map(|i| dist2(poly[i], poly[(i + 1) % poly.len()]).sqrt())
        .sum()
}

/// Length of the shortest edge of a closed polygon.
pub fn min_edge_length(poly: &[Pt]) -> f64 {
    if poly.len() < 2 {
        return 0.0;
    }
    (0..poly.len())
        .map(|i| dist2(poly[i], poly[(i + 1) % poly.len()]))
        .fold(f64::INFINITY, f64::min)
        .sqrt()
}

/// Strict convexity: every turn has the same sign and none is collinear.
pub fn is_contour_convex(poly: &[Pt]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut orientation = 0u8;
    for i in 0..n {
        let p0 = poly[i];
        let p1 = poly[(i + 1) % n];
        let p2 = poly[(i + 2) % n];
        let cross = (p1.0 - p0.0) as i64 * (p2.1 - p1.1) as i64
            - (p1.1 - p0.1) as i64 * (p2.0 - p1.0) as i64;
        orientation |= match cross.signum() {
            1 => 1,
            -1 => 2,
            _ => 3,
        };
        if orientation == 3 {
            return false;
        }
    }
    true
}

pub fn perimeter_f32(poly: &[Point2<f32>]) -> f32 {
    (0..poly.len())
        .map(|i| (poly[(i + 1) % poly.len()] - poly[i]).norm())
        .sum()
}

/// Signed area (shoelace); positive for clockwise order in image coordinates.
pub fn signed_area_f32(poly: &[Point2<f32>]) -> f32 {
    let n = poly.len();
    0.5 * (0..n)
        .map(|i| {
            let a = poly[i];
            let b = poly[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum::<f32>()
}
