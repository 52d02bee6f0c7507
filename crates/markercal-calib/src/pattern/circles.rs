//! Dark-disc grids, symmetric and asymmetric.
//!
//! Blobs come from a global Otsu split and 8-connected labelling, filtered
//! by area, circularity and inertia. Their centers are linked into a grid
//! graph; for the asymmetric layout the graph runs along the diagonals,
//! where the nearest neighbours are. The lattice fit is then checked by
//! projecting every ideal position through the homography of the four
//! outer features and snapping it to the nearest blob.

use markercal_core::{homography_from_4pt, otsu_threshold_from_samples, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use kiddo::{KdTree, SquaredEuclidean};

use super::grid::{
    assign_grid_coordinates, connected_components, dominant_axis, fit_lattice,
    median_nearest_spacing, rectangular, staggered, GridGraph, GridGraphParams,
};
use super::{calc_board_corner_positions, BoardSize, Pattern};

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BlobParams {
    pub min_area: f32,
    pub max_area: f32,
    /// Accepted range of `4π·area / perimeter²`.
    pub min_circularity: f32,
    pub max_circularity: f32,
    /// Minimal ratio of the second-moment eigenvalues.
    pub min_inertia_ratio: f32,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            min_area: 12.0,
            max_area: 20_000.0,
            min_circularity: 0.75,
            max_circularity: 1.25,
            min_inertia_ratio: 0.1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Blob {
    pub center: Point2<f32>,
    pub area: f32,
}

/// Dark blobs that look like discs. Blobs touching the image border are
/// skipped.
pub fn detect_blobs(gray: &GrayImageView<'_>, params: &BlobParams) -> Vec<Blob> {
    let (w, h) = (gray.width, gray.height);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let t = otsu_threshold_from_samples(gray.data);
    let dark = |x: usize, y: usize| gray.get(x, y) < t;

    let mut label = vec![false; w * h];
    let mut blobs = Vec::new();
    let mut stack = Vec::new();
    let mut pixels: Vec<(usize, usize)> = Vec::new();

    for y0 in 0..h {
        for x0 in 0..w {
            if label[y0 * w + x0] || !dark(x0, y0) {
                continue;
            }
            label[y0 * w + x0] = true;
            stack.push((x0, y0));
            pixels.clear();
            let mut touches_border = false;

            while let Some((x, y)) = stack.pop() {
                pixels.push((x, y));
                if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
                    touches_border = true;
                }
                for dy in -1i32..=1 {
                    for dx in -1i32..=1 {
                        let (nx, ny) = (x as i32 + dx, y as i32 + dy);
                        if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                            continue;
                        }
                        let (nx, ny) = (nx as usize, ny as usize);
                        if !label[ny * w + nx] && dark(nx, ny) {
                            label[ny * w + nx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            if touches_border {
                continue;
            }
            if let Some(blob) = measure_blob(&pixels, &dark, params) {
                blobs.push(blob);
            }
        }
    }
    log::debug!("blobs: {} discs at threshold {}", blobs.len(), t);
    blobs
}

fn measure_blob<F>(pixels: &[(usize, usize)], dark: &F, params: &BlobParams) -> Option<Blob>
where
    F: Fn(usize, usize) -> bool,
{
    let area = pixels.len() as f32;
    if area < params.min_area || area > params.max_area {
        return None;
    }

    let n = pixels.len() as f64;
    let (sx, sy) = pixels
        .iter()
        .fold((0.0f64, 0.0f64), |(ax, ay), &(x, y)| (ax + x as f64, ay + y as f64));
    let (mx, my) = (sx / n, sy / n);

    let (mut cxx, mut cxy, mut cyy) = (0.0f64, 0.0f64, 0.0f64);
    let mut edges = 0usize;
    for &(x, y) in pixels {
        let (dx, dy) = (x as f64 - mx, y as f64 - my);
        cxx += dx * dx;
        cxy += dx * dy;
        cyy += dy * dy;
        // Interior pixels never touch the border, so neighbours exist.
        edges += [(x - 1, y), (x + 1, y), (x, y - 1), (x, y + 1)]
            .iter()
            .filter(|&&(nx, ny)| !dark(nx, ny))
            .count();
    }

    let tr = cxx + cyy;
    let disc = ((cxx - cyy).powi(2) + 4.0 * cxy * cxy).sqrt();
    let (l_max, l_min) = (0.5 * (tr + disc), 0.5 * (tr - disc));
    if l_max <= 0.0 || (l_min / l_max) < params.min_inertia_ratio as f64 {
        return None;
    }

    // City-block boundary length overestimates a smooth perimeter by 4/π.
    let perimeter = edges as f32 * std::f32::consts::FRAC_PI_4;
    let circularity = 4.0 * std::f32::consts::PI * area / (perimeter * perimeter);
    if circularity < params.min_circularity || circularity > params.max_circularity {
        return None;
    }

    Some(Blob {
        center: Point2::new(mx as f32, my as f32),
        area,
    })
}

/// Disc centers of a `board.width × board.height` grid in the order of
/// [`calc_board_corner_positions`]. `symmetric = false` selects the
/// asymmetric layout with odd rows shifted by half a column.
pub fn find_circles_grid(
    gray: &GrayImageView<'_>,
    board: BoardSize,
    symmetric: bool,
    params: &BlobParams,
) -> Option<Vec<Point2<f32>>> {
    if board.width < 2 || board.height < 2 {
        return None;
    }
    let blobs = detect_blobs(gray, params);
    if blobs.len() < board.count() {
        log::debug!("circles: {} blobs, need {}", blobs.len(), board.count());
        return None;
    }
    let points: Vec<Point2<f32>> = blobs.iter().map(|b| b.center).collect();
    let area = (gray.width * gray.height) as f32;
    let spacing = median_nearest_spacing(&points, 2.0 * (area / points.len() as f32).sqrt())?;
    let axis = neighbor_axis(&points, spacing)?;

    let graph = GridGraph::new(&points, axis, &GridGraphParams::around_spacing(spacing), |_, _| {
        Some(0.0)
    });
    let mut components = connected_components(&graph);
    components.sort_by_key(|c| std::cmp::Reverse(c.len()));

    for component in components {
        if component.len() != board.count() {
            continue;
        }
        let Some(coords) = assign_grid_coordinates(&graph, &component) else {
            continue;
        };
        let order = if symmetric {
            fit_lattice(&coords, &points, board.width, board.height, rectangular)
        } else {
            // Diagonal lattice (p, q) to staggered columns and rows.
            let diag: Vec<(usize, i32, i32)> =
                coords.iter().map(|&(n, p, q)| (n, p - q, p + q)).collect();
            fit_lattice(&diag, &points, board.width, board.height, staggered)
        };
        let Some(order) = order else {
            continue;
        };
        let ordered: Vec<Point2<f32>> = order.into_iter().map(|n| points[n]).collect();
        let pattern = if symmetric {
            Pattern::CirclesGrid
        } else {
            Pattern::AsymmetricCirclesGrid
        };
        if let Some(snapped) = snap_to_blobs(&ordered, &points, board, pattern, spacing) {
            return Some(snapped);
        }
    }
    log::debug!("circles: no {}x{} grid", board.width, board.height);
    None
}

/// Grid direction from each center's near neighbours.
fn neighbor_axis(points: &[Point2<f32>], spacing: f32) -> Option<f32> {
    let coords = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();
    let r = 1.2 * spacing;
    let mut angles = Vec::new();
    for (i, p) in points.iter().enumerate() {
        for nn in tree.within::<SquaredEuclidean>(&[p.x, p.y], r * r) {
            let j = nn.item as usize;
            if j == i {
                continue;
            }
            let e = points[j] - p;
            angles.push((e.y.atan2(e.x), 1.0));
        }
    }
    dominant_axis(angles)
}

/// Project the ideal layout through the four outer features and pick the
/// nearest blob for every position.
fn snap_to_blobs(
    ordered: &[Point2<f32>],
    blobs: &[Point2<f32>],
    board: BoardSize,
    pattern: Pattern,
    spacing: f32,
) -> Option<Vec<Point2<f32>>> {
    let ideal = calc_board_corner_positions(board, 1.0, pattern);
    let (w, h) = (board.width, board.height);
    let outer = [0, w - 1, w * h - 1, (h - 1) * w];
    let src: [Point2<f64>; 4] =
        std::array::from_fn(|k| Point2::new(ideal[outer[k]].x as f64, ideal[outer[k]].y as f64));
    let dst: [Point2<f64>; 4] = std::array::from_fn(|k| {
        Point2::new(ordered[outer[k]].x as f64, ordered[outer[k]].y as f64)
    });
    let hm = homography_from_4pt(&src, &dst).ok()?;

    let coords = blobs.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();
    let max_dist = 0.4 * spacing;
    let mut out = Vec::with_capacity(ideal.len());
    for (k, p) in ideal.iter().enumerate() {
        let q = hm.apply(Point2::new(p.x as f64, p.y as f64));
        let query = [q.x as f32, q.y as f32];
        let nn = tree
            .within::<SquaredEuclidean>(&query, max_dist * max_dist)
            .into_iter()
            .next()?;
        let found = blobs[nn.item as usize];
        if (found - ordered[k]).norm() > max_dist {
            return None;
        }
        out.push(found);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::synthetic;

    fn layout(board: BoardSize, pattern: Pattern, s: f32, origin: (f32, f32)) -> Vec<Point2<f32>> {
        calc_board_corner_positions(board, s, pattern)
            .into_iter()
            .map(|p| Point2::new(origin.0 + p.x, origin.1 + p.y))
            .collect()
    }

    #[test]
    fn blobs_reject_squares_and_keep_discs() {
        let mut img = synthetic::discs(120, 80, &[Point2::new(30.0, 40.0)], 9.0);
        for y in 30..50 {
            for x in 70..90 {
                img.set(x, y, 25);
            }
        }
        let blobs = detect_blobs(&img.view(), &BlobParams::default());
        assert_eq!(blobs.len(), 1);
        assert!((blobs[0].center - Point2::new(30.0, 40.0)).norm() < 0.3);
    }

    #[test]
    fn finds_symmetric_grid_in_board_order() {
        let board = BoardSize::new(5, 4);
        let truth = layout(board, Pattern::CirclesGrid, 30.0, (50.0, 40.0));
        let img = synthetic::discs(260, 200, &truth, 8.0);
        let found = find_circles_grid(&img.view(), board, true, &BlobParams::default())
            .expect("grid");
        for (f, t) in found.iter().zip(&truth) {
            assert!((f - t).norm() < 0.5, "{f:?} vs {t:?}");
        }
    }

    #[test]
    fn finds_asymmetric_grid_in_board_order() {
        let board = BoardSize::new(4, 5);
        let truth = layout(board, Pattern::AsymmetricCirclesGrid, 20.0, (40.0, 30.0));
        let img = synthetic::discs(260, 180, &truth, 6.0);
        let found = find_circles_grid(&img.view(), board, false, &BlobParams::default())
            .expect("grid");
        assert_eq!(found.len(), 20);
        for (f, t) in found.iter().zip(&truth) {
            assert!((f - t).norm() < 0.5, "{f:?} vs {t:?}");
        }
    }

    #[test]
    fn incomplete_grid_is_not_found() {
        let board = BoardSize::new(5, 4);
        let mut truth = layout(board, Pattern::CirclesGrid, 30.0, (50.0, 40.0));
        truth.pop();
        let img = synthetic::discs(260, 200, &truth, 8.0);
        assert!(find_circles_grid(&img.view(), board, true, &BlobParams::default()).is_none());
    }
}
