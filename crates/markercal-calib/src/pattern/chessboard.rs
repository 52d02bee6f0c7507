//! Chessboard inner-corner detection.
//!
//! Graph-based and perspective tolerant:
//! 1. ChESS response peaks with their bright-diagonal orientation.
//! 2. Global grid axes from the orientations (quadruple-angle mean).
//! 3. Base spacing from nearest-neighbour distances.
//! 4. Up to four neighbours per corner: distance near the spacing, edge
//!    along ±u or ±v, orientations orthogonal and each ~45° off the edge.
//! 5. BFS over each connected component assigns lattice coordinates.
//! 6. The component covering exactly `width × height` cells is returned
//!    row-major.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use markercal_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use super::chess_response::{chess_corners, ChessCorner};
use super::grid::{
    angle_diff_abs, assign_grid_coordinates, axis_vec_diff, connected_components, dominant_axis,
    fit_lattice, median_nearest_spacing, rectangular, wrap_quarter, GridGraph, GridGraphParams,
};
use super::BoardSize;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ChessboardParams {
    /// Peaks below this fraction of the strongest response are dropped.
    pub threshold_rel: f32,
    pub nms_radius: usize,
    pub orientation_tolerance_deg: f32,
}

impl Default for ChessboardParams {
    fn default() -> Self {
        Self {
            threshold_rel: 0.2,
            nms_radius: 3,
            orientation_tolerance_deg: 22.5,
        }
    }
}

/// Orientation checks for a candidate edge; lower scores are better.
fn is_good_neighbor(corner: &ChessCorner, neighbor: &ChessCorner, tol: f32) -> Option<f32> {
    let score_orientation =
        (FRAC_PI_2 - angle_diff_abs(corner.orientation, neighbor.orientation)).abs();
    if score_orientation > tol {
        return None;
    }

    // Orientation follows the bright diagonal, so an edge to a lattice
    // neighbour sits at ~45° to both corners.
    let e = neighbor.position - corner.position;
    let edge_angle = e.y.atan2(e.x);
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - FRAC_PI_4).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - FRAC_PI_4).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }
    Some(score_corner + score_neighbor + score_orientation)
}

/// Inner corners of a `board.width × board.height` chessboard, row-major,
/// at pixel accuracy. `None` when no component forms the full board.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(w = board.width, h = board.height))
)]
pub fn find_chessboard_corners(
    gray: &GrayImageView<'_>,
    board: BoardSize,
    params: &ChessboardParams,
) -> Option<Vec<Point2<f32>>> {
    if board.width < 2 || board.height < 2 {
        return None;
    }
    let corners = chess_corners(gray, params.threshold_rel, params.nms_radius);
    if corners.len() < board.count() {
        log::debug!(
            "chessboard: {} corners, need {}",
            corners.len(),
            board.count()
        );
        return None;
    }

    let points: Vec<Point2<f32>> = corners.iter().map(|c| c.position).collect();
    let area = (gray.width * gray.height) as f32;
    let search = 2.0 * (area / corners.len() as f32).sqrt();
    let spacing = median_nearest_spacing(&points, search)?;
    let diagonal = dominant_axis(corners.iter().map(|c| (c.orientation, c.response)))?;
    let axis = wrap_quarter(diagonal + FRAC_PI_4);

    let tol = params.orientation_tolerance_deg.to_radians();
    let graph_params = GridGraphParams {
        axis_tolerance_deg: params.orientation_tolerance_deg,
        ..GridGraphParams::around_spacing(spacing)
    };
    let graph = GridGraph::new(&points, axis, &graph_params, |i, j| {
        is_good_neighbor(&corners[i], &corners[j], tol)
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
        if let Some(order) = fit_lattice(&coords, &points, board.width, board.height, rectangular)
        {
            log::debug!("chessboard: found, spacing {:.1}px", spacing);
            return Some(order.into_iter().map(|n| points[n]).collect());
        }
    }
    log::debug!("chessboard: no {}x{} component", board.width, board.height);
    None
}
