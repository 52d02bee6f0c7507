//! 4-connected grid graph over detected pattern features.
//!
//! Neighbours are searched with a k-d tree, classified against a global
//! pair of grid axes `(u, v)` and kept only when the relation is mutual.
//! BFS over a connected component yields integer lattice coordinates that
//! [`fit_lattice`] maps onto board indices.

use std::collections::{HashMap, VecDeque};
use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    pub fn opposite(self) -> Self {
        match self {
            NeighborDirection::Right => NeighborDirection::Left,
            NeighborDirection::Left => NeighborDirection::Right,
            NeighborDirection::Up => NeighborDirection::Down,
            NeighborDirection::Down => NeighborDirection::Up,
        }
    }

    fn step(self) -> (i32, i32) {
        match self {
            NeighborDirection::Right => (1, 0),
            NeighborDirection::Left => (-1, 0),
            NeighborDirection::Up => (0, -1),
            NeighborDirection::Down => (0, 1),
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridGraphParams {
    pub min_spacing_pix: f32,
    pub max_spacing_pix: f32,
    /// Maximal angle between an edge and the `u` or `v` axis.
    pub axis_tolerance_deg: f32,
}

impl Default for GridGraphParams {
    fn default() -> Self {
        Self {
            min_spacing_pix: 5.0,
            max_spacing_pix: 50.0,
            axis_tolerance_deg: 22.5,
        }
    }
}

impl GridGraphParams {
    /// Spacing window around a measured lattice pitch.
    pub fn around_spacing(spacing: f32) -> Self {
        Self {
            min_spacing_pix: 0.5 * spacing,
            max_spacing_pix: 1.8 * spacing,
            ..Self::default()
        }
    }
}

pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

/// Classify `e` against the axes; the score is the angular misalignment.
fn classify(
    e: &Vector2<f32>,
    u: &Vector2<f32>,
    v: &Vector2<f32>,
    tol: f32,
) -> Option<(NeighborDirection, f32)> {
    let len = e.norm();
    if len <= f32::EPSILON {
        return None;
    }
    let du = e.dot(u) / len;
    let dv = e.dot(v) / len;
    let cos_tol = tol.cos();
    if du.abs() >= cos_tol {
        let dir = if du > 0.0 {
            NeighborDirection::Right
        } else {
            NeighborDirection::Left
        };
        return Some((dir, du.abs().min(1.0).acos()));
    }
    if dv.abs() >= cos_tol {
        let dir = if dv > 0.0 {
            NeighborDirection::Down
        } else {
            NeighborDirection::Up
        };
        return Some((dir, dv.abs().min(1.0).acos()));
    }
    None
}

/// Keep at most one neighbor per direction, choosing the lowest-score candidate.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = [None, None, None, None];

    for candidate in candidates.into_iter() {
        let slot = match candidate.direction {
            NeighborDirection::Right => &mut best[0],
            NeighborDirection::Left => &mut best[1],
            NeighborDirection::Up => &mut best[2],
            NeighborDirection::Down => &mut best[3],
        };

        let replace = match slot {
            None => true,
            Some(current) => {
                candidate.score < current.score
                    || (candidate.score == current.score && candidate.distance < current.distance)
            }
        };

        if replace {
            *slot = Some(candidate);
        }
    }

    best.into_iter().flatten().collect()
}

impl GridGraph {
    /// Build the graph. `axis_angle` is the direction of `u` in radians;
    /// `v` is `u` turned a quarter clockwise on screen (towards +y).
    /// `accept(i, j)` vets a candidate pair and adds to its score.
    pub fn new<F>(
        points: &[Point2<f32>],
        axis_angle: f32,
        params: &GridGraphParams,
        accept: F,
    ) -> Self
    where
        F: Fn(usize, usize) -> Option<f32>,
    {
        let u = Vector2::new(axis_angle.cos(), axis_angle.sin());
        let v = Vector2::new(-axis_angle.sin(), axis_angle.cos());
        let tol = params.axis_tolerance_deg.to_radians();

        let coords = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let max_sq = params.max_spacing_pix * params.max_spacing_pix;

        let mut selected = Vec::with_capacity(points.len());
        for (i, p) in points.iter().enumerate() {
            let mut candidates = Vec::new();
            for nn in tree.within::<SquaredEuclidean>(&[p.x, p.y], max_sq) {
                let j = nn.item as usize;
                if j == i {
                    continue;
                }
                let distance = nn.distance.sqrt();
                if distance < params.min_spacing_pix {
                    continue;
                }
                let e = points[j] - p;
                let Some((direction, misalignment)) = classify(&e, &u, &v, tol) else {
                    continue;
                };
                let Some(extra) = accept(i, j) else {
                    continue;
                };
                candidates.push(NodeNeighbor {
                    direction,
                    index: j,
                    distance,
                    score: misalignment + extra,
                });
            }
            selected.push(select_neighbors(candidates));
        }

        // Mutual edges only.
        let neighbors = selected
            .iter()
            .enumerate()
            .map(|(i, list)| {
                list.iter()
                    .filter(|n| {
                        selected[n.index].iter().any(|back| {
                            back.index == i && back.direction == n.direction.opposite()
                        })
                    })
                    .cloned()
                    .collect()
            })
            .collect();

        Self { neighbors }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];

        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);
            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }

        components.push(component);
    }

    components
}

/// BFS lattice coordinates `(node, x, y)` for one component. `None` when
/// the graph is inconsistent: a node reached at two coordinates, or two
/// nodes sharing one.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut at: HashMap<usize, (i32, i32)> = HashMap::new();
    let mut owner: HashMap<(i32, i32), usize> = HashMap::new();
    let mut queue = VecDeque::new();
    at.insert(start, (0, 0));
    owner.insert((0, 0), start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let (x, y) = at[&node];
        for neighbor in &graph.neighbors[node] {
            let (dx, dy) = neighbor.direction.step();
            let c = (x + dx, y + dy);
            match at.get(&neighbor.index) {
                Some(&prev) if prev != c => return None,
                Some(_) => {}
                None => {
                    if owner.insert(c, neighbor.index).is_some() {
                        return None;
                    }
                    at.insert(neighbor.index, c);
                    queue.push_back(neighbor.index);
                }
            }
        }
    }

    let mut coords: Vec<(usize, i32, i32)> = at.into_iter().map(|(n, (x, y))| (n, x, y)).collect();
    coords.sort_unstable();
    Some(coords)
}

/// Map lattice coordinates onto a `width × height` board, row-major.
///
/// The four proper rotations of the lattice are tried; `to_board` turns
/// normalized `(x, y)` into `(column, row)` or rejects it. Among the
/// rotations that cover every board cell exactly once, the one whose first
/// feature lies nearest the image top-left wins.
pub fn fit_lattice<F>(
    coords: &[(usize, i32, i32)],
    points: &[Point2<f32>],
    width: usize,
    height: usize,
    to_board: F,
) -> Option<Vec<usize>>
where
    F: Fn(i32, i32) -> Option<(usize, usize)>,
{
    if coords.len() != width * height {
        return None;
    }
    let rotations: [fn(i32, i32) -> (i32, i32); 4] = [
        |x, y| (x, y),
        |x, y| (-y, x),
        |x, y| (-x, -y),
        |x, y| (y, -x),
    ];

    let mut best: Option<(f32, Vec<usize>)> = None;
    'rot: for rot in rotations {
        let turned: Vec<(usize, i32, i32)> = coords
            .iter()
            .map(|&(n, x, y)| {
                let (rx, ry) = rot(x, y);
                (n, rx, ry)
            })
            .collect();
        let min_x = turned.iter().map(|c| c.1).min()?;
        let min_y = turned.iter().map(|c| c.2).min()?;

        let mut order = vec![usize::MAX; width * height];
        for &(n, x, y) in &turned {
            let Some((j, i)) = to_board(x - min_x, y - min_y) else {
                continue 'rot;
            };
            if j >= width || i >= height || order[i * width + j] != usize::MAX {
                continue 'rot;
            }
            order[i * width + j] = n;
        }

        let origin = points[order[0]];
        let key = origin.x + origin.y;
        if best.as_ref().is_none_or(|(k, _)| key < *k) {
            best = Some((key, order));
        }
    }
    best.map(|(_, order)| order)
}

/// Plain rectangular lattice.
pub fn rectangular(x: i32, y: i32) -> Option<(usize, usize)> {
    (x >= 0 && y >= 0).then_some((x as usize, y as usize))
}

/// Lattice whose odd rows are shifted by half a column.
pub fn staggered(x: i32, y: i32) -> Option<(usize, usize)> {
    if x < 0 || y < 0 {
        return None;
    }
    let shifted = x - (y % 2);
    (shifted >= 0 && shifted % 2 == 0).then_some(((shifted / 2) as usize, y as usize))
}

/// Median distance from each point to its nearest other point.
pub fn median_nearest_spacing(points: &[Point2<f32>], search_radius: f32) -> Option<f32> {
    if points.len() < 2 {
        return None;
    }
    let coords = points.iter().map(|p| [p.x, p.y]).collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();
    let r2 = search_radius * search_radius;
    let mut dists: Vec<f32> = points
        .iter()
        .enumerate()
        .filter_map(|(i, p)| {
            tree.within::<SquaredEuclidean>(&[p.x, p.y], r2)
                .into_iter()
                .find(|nn| nn.item as usize != i && nn.distance > 0.0)
                .map(|nn| nn.distance.sqrt())
        })
        .collect();
    if dists.is_empty() {
        return None;
    }
    dists.sort_by(f32::total_cmp);
    Some(dists[dists.len() / 2])
}

/// Dominant direction of a set of lines with 90° symmetry, averaged in
/// quadruple-angle space. Returned in `(−π/4, π/4]`.
pub fn dominant_axis<I>(angles: I) -> Option<f32>
where
    I: IntoIterator<Item = (f32, f32)>,
{
    let mut sum = Vector2::<f32>::zeros();
    let mut weight_sum = 0.0f32;
    for (theta, w) in angles {
        if w <= 0.0 {
            continue;
        }
        sum += w * Vector2::new((4.0 * theta).cos(), (4.0 * theta).sin());
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return None;
    }
    let mean = sum / weight_sum;
    if mean.norm_squared() < 1e-6 {
        return None;
    }
    Some(wrap_quarter(0.25 * mean.y.atan2(mean.x)))
}

/// Wrap an angle with 90° symmetry into `(−π/4, π/4]`.
pub fn wrap_quarter(theta: f32) -> f32 {
    let mut t = theta.rem_euclid(FRAC_PI_2);
    if t > FRAC_PI_4 {
        t -= FRAC_PI_2;
    }
    t
}

/// Absolute difference of two angles, in `[0, π]`.
pub fn angle_diff_abs(a: f32, b: f32) -> f32 {
    let mut diff = (b - a).rem_euclid(2.0 * PI);
    if diff >= PI {
        diff -= 2.0 * PI;
    }
    diff.abs()
}

/// Angle between an undirected axis (modulo π) and a directed vector
/// angle, in `[0, π/2]`.
pub fn axis_vec_diff(axis_angle: f32, vec_angle: f32) -> f32 {
    let d = angle_diff_abs(axis_angle, vec_angle);
    d.min(PI - d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice(cols: usize, rows: usize, spacing: f32, angle: f32) -> Vec<Point2<f32>> {
        let (c, s) = (angle.cos(), angle.sin());
        let mut pts = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let (x, y) = (i as f32 * spacing, j as f32 * spacing);
                pts.push(Point2::new(100.0 + c * x - s * y, 80.0 + s * x + c * y));
            }
        }
        pts
    }

    fn neighbor_map(neighbors: &[NodeNeighbor]) -> HashMap<NeighborDirection, &NodeNeighbor> {
        neighbors.iter().map(|n| (n.direction, n)).collect()
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let spacing = 10.0;
        let corners = lattice(3, 3, spacing, 0.0);
        let params = GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        };
        let graph = GridGraph::new(&corners, 0.0, &params, |_, _| Some(0.0));
        let idx = |i: usize, j: usize| j * 3 + i;

        let center = neighbor_map(&graph.neighbors[idx(1, 1)]);
        assert_eq!(4, center.len());
        assert_eq!(idx(0, 1), center[&NeighborDirection::Left].index);
        assert_eq!(idx(2, 1), center[&NeighborDirection::Right].index);
        assert_eq!(idx(1, 0), center[&NeighborDirection::Up].index);
        assert_eq!(idx(1, 2), center[&NeighborDirection::Down].index);
        for n in center.values() {
            assert!((n.distance - spacing).abs() < 1e-4);
        }

        let top_left = neighbor_map(&graph.neighbors[idx(0, 0)]);
        assert_eq!(2, top_left.len());
        assert!(top_left.contains_key(&NeighborDirection::Right));
        assert!(top_left.contains_key(&NeighborDirection::Down));
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let corners = vec![Point2::new(0.0, 0.0), Point2::new(30.0, 0.0)];
        let params = GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        };
        let graph = GridGraph::new(&corners, 0.0, &params, |_, _| Some(0.0));
        assert!(graph.neighbors[0].is_empty());
        assert!(graph.neighbors[1].is_empty());
    }

    #[test]
    fn accept_closure_vetoes_edges() {
        let corners = lattice(2, 1, 10.0, 0.0);
        let graph = GridGraph::new(&corners, 0.0, &GridGraphParams::default(), |_, _| None);
        assert!(graph.neighbors.iter().all(|n| n.is_empty()));
    }

    #[test]
    fn keeps_best_candidate_per_direction() {
        let corners = vec![
            Point2::new(0.0, 0.0),
            Point2::new(10.0, 0.0),
            Point2::new(12.0, 3.0),
            Point2::new(-10.0, 0.0),
        ];
        let params = GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        };
        let graph = GridGraph::new(&corners, 0.0, &params, |_, _| Some(0.0));
        let map = neighbor_map(&graph.neighbors[0]);
        assert_eq!(2, map.len());
        assert_eq!(1, map[&NeighborDirection::Right].index);
        assert_eq!(3, map[&NeighborDirection::Left].index);
        // Node 2 points left at node 0 but node 0 prefers node 1.
        assert!(graph.neighbors[2]
            .iter()
            .all(|n| n.direction != NeighborDirection::Left));
    }

    #[test]
    fn rotated_lattice_fits_board_in_row_major_order() {
        let angle = 0.2f32;
        let pts = lattice(4, 3, 20.0, angle);
        let graph = GridGraph::new(&pts, angle, &GridGraphParams::around_spacing(20.0), |_, _| {
            Some(0.0)
        });
        let comps = connected_components(&graph);
        assert_eq!(comps.len(), 1);
        let coords = assign_grid_coordinates(&graph, &comps[0]).expect("consistent");
        let order = fit_lattice(&coords, &pts, 4, 3, rectangular).expect("fits");
        assert_eq!(order, (0..12).collect::<Vec<_>>());

        // A 3×4 board sees the same lattice turned a quarter.
        let order = fit_lattice(&coords, &pts, 3, 4, rectangular).expect("fits");
        assert_eq!(order.len(), 12);
        assert_eq!(order[0], 8);
        assert!(fit_lattice(&coords, &pts, 5, 3, rectangular).is_none());
    }

    #[test]
    fn staggered_mapping_requires_matching_parity() {
        assert_eq!(staggered(0, 0), Some((0, 0)));
        assert_eq!(staggered(1, 1), Some((0, 1)));
        assert_eq!(staggered(4, 2), Some((2, 2)));
        assert_eq!(staggered(1, 0), None);
        assert_eq!(staggered(2, 1), None);
    }

    #[test]
    fn dominant_axis_handles_alternating_diagonals() {
        let a = dominant_axis([(FRAC_PI_4 + 0.1, 1.0), (3.0 * FRAC_PI_4 + 0.1, 1.0)]).expect("axis");
        assert!((a - (0.1 - FRAC_PI_4)).abs() < 1e-4);
        assert!((wrap_quarter(a + FRAC_PI_4) - 0.1).abs() < 1e-4);
    }

    #[test]
    fn median_spacing_ignores_outliers() {
        let mut pts = lattice(4, 4, 12.0, 0.0);
        pts.push(Point2::new(400.0, 400.0));
        let s = median_nearest_spacing(&pts, 100.0).expect("spacing");
        assert!((s - 12.0).abs() < 1e-4);
    }
}
