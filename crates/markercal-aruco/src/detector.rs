//! Square marker detection: threshold, trace, fit quads, decode.

use std::collections::HashMap;

use markercal_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::contours::find_contours;
use crate::decode::CandidateDecoder;
use crate::geometry::{approx_poly_dp, is_contour_convex, perimeter_f32, signed_area_f32};
use crate::params::{DetectorParameters, ParamsError};
use crate::threshold::adaptive_threshold_mean;
use crate::{Dictionary, Matcher};

/// A decoded marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArucoMarker {
    pub id: u32,
    /// Image corners, clockwise, starting at the marker's own top-left.
    pub corners: [Point2<f32>; 4],
    pub hamming: u8,
}

impl ArucoMarker {
    pub fn center(&self) -> Point2<f32> {
        let sum = self
            .corners
            .iter()
            .fold(nalgebra::Vector2::zeros(), |acc, p| acc + p.coords);
        Point2::from(sum / 4.0)
    }
}

/// Output of one detection pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Detections {
    pub found: Vec<ArucoMarker>,
    /// Quads that looked like markers but did not decode.
    pub rejected: Vec<[Point2<f32>; 4]>,
}

/// Detector bound to one dictionary and parameter set.
#[derive(Clone, Debug)]
pub struct ArucoDetector {
    dictionary: Dictionary,
    params: DetectorParameters,
    matcher: Matcher,
}

impl ArucoDetector {
    pub fn new(dictionary: Dictionary, params: DetectorParameters) -> Result<Self, ParamsError> {
        params.validate()?;
        let max_hamming =
            (dictionary.max_correction_bits as f32 * params.error_correction_rate).floor() as u8;
        let matcher = Matcher::new(&dictionary, max_hamming);
        Ok(Self {
            dictionary,
            params,
            matcher,
        })
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn params(&self) -> &DetectorParameters {
        &self.params
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(width = gray.width, height = gray.height))
    )]
    pub fn detect(&self, gray: &GrayImageView<'_>) -> Detections {
        let candidates = self.detect_candidates(gray);
        let decoder = CandidateDecoder::new(&self.params, &self.matcher);

        let mut found: Vec<ArucoMarker> = Vec::new();
        let mut rejected = Vec::new();
        for quad in candidates {
            match decoder.decode(gray, &quad) {
                Some((_, m)) => {
                    let r = m.rotation as usize;
                    found.push(ArucoMarker {
                        id: m.id,
                        corners: std::array::from_fn(|k| quad[(k + r) % 4]),
                        hamming: m.hamming,
                    });
                }
                None => rejected.push(quad),
            }
        }

        let found = keep_best_per_id(found);
        log::debug!(
            "aruco: {} markers found, {} candidates rejected",
            found.len(),
            rejected.len()
        );
        Detections { found, rejected }
    }

    /// Convex quads that pass the geometric filters, clockwise, with near
    /// duplicates removed.
    pub fn detect_candidates(&self, gray: &GrayImageView<'_>) -> Vec<[Point2<f32>; 4]> {
        let p = &self.params;
        let max_side = gray.width.max(gray.height) as f32;
        let min_len = p.min_marker_perimeter_rate * max_side;
        let max_len = p.max_marker_perimeter_rate * max_side;

        let mut candidates: Vec<[Point2<f32>; 4]> = Vec::new();
        for win in p.window_sizes() {
            let binary = adaptive_threshold_mean(gray, win, p.adaptive_thresh_constant);
            for contour in find_contours(&binary.view()) {
                if contour.hole && !p.detect_inverted_marker {
                    continue;
                }
                let len = contour.points.len() as f32;
                if len < min_len || len > max_len {
                    continue;
                }
                let poly = approx_poly_dp(
                    &contour.points,
                    (len * p.polygonal_approx_accuracy_rate) as f64,
                );
                if poly.len() != 4 || !is_contour_convex(&poly) {
                    continue;
                }
                let min_corner_dist = (len * p.min_corner_distance_rate).max(10.0);
                let quad: [Point2<f32>; 4] =
                    std::array::from_fn(|i| Point2::new(poly[i].0 as f32, poly[i].1 as f32));
                if min_edge(&quad) < min_corner_dist {
                    continue;
                }
                if too_close_to_border(&quad, gray.width, gray.height, p.min_distance_to_border) {
                    continue;
                }
                candidates.push(clockwise(quad));
            }
        }

        filter_too_close(candidates, p.min_marker_distance_rate)
    }
}

/// One-shot detection on a gray frame.
pub fn detect_aruco_on_frame(
    gray: &GrayImageView<'_>,
    dictionary: &Dictionary,
    params: &DetectorParameters,
) -> Result<Detections, ParamsError> {
    let detector = ArucoDetector::new(dictionary.clone(), params.clone())?;
    Ok(detector.detect(gray))
}

fn min_edge(quad: &[Point2<f32>; 4]) -> f32 {
    (0..4)
        .map(|i| (quad[(i + 1) % 4] - quad[i]).norm())
        .fold(f32::INFINITY, f32::min)
}

fn too_close_to_border(quad: &[Point2<f32>; 4], w: usize, h: usize, margin: u32) -> bool {
    let m = margin as f32;
    quad.iter().any(|c| {
        c.x < m || c.y < m || c.x > (w as f32 - 1.0 - m) || c.y > (h as f32 - 1.0 - m)
    })
}

/// Reorder so the corners run clockwise in image coordinates (y down).
fn clockwise(mut quad: [Point2<f32>; 4]) -> [Point2<f32>; 4] {
    if signed_area_f32(&quad) < 0.0 {
        quad.swap(1, 3);
    }
    quad
}

/// Mean squared corner distance under the best cyclic alignment.
fn quad_distance_sq(a: &[Point2<f32>; 4], b: &[Point2<f32>; 4]) -> f32 {
    (0..4)
        .map(|shift| {
            (0..4)
                .map(|k| (a[k] - b[(k + shift) % 4]).norm_squared())
                .sum::<f32>()
                / 4.0
        })
        .fold(f32::INFINITY, f32::min)
}

/// Drop the smaller of any two candidates whose corners nearly coincide.
fn filter_too_close(candidates: Vec<[Point2<f32>; 4]>, rate: f32) -> Vec<[Point2<f32>; 4]> {
    let perimeters: Vec<f32> = candidates.iter().map(|q| perimeter_f32(q)).collect();
    let mut removed = vec![false; candidates.len()];
    for i in 0..candidates.len() {
        for j in i + 1..candidates.len() {
            if removed[i] || removed[j] {
                continue;
            }
            let min_dist = rate * perimeters[i].min(perimeters[j]);
            if quad_distance_sq(&candidates[i], &candidates[j]) < min_dist * min_dist {
                if perimeters[i] < perimeters[j] {
                    removed[i] = true;
                } else {
                    removed[j] = true;
                }
            }
        }
    }
    candidates
        .into_iter()
        .zip(removed)
        .filter_map(|(q, r)| (!r).then_some(q))
        .collect()
}

fn keep_best_per_id(found: Vec<ArucoMarker>) -> Vec<ArucoMarker> {
    let mut best: HashMap<u32, ArucoMarker> = HashMap::new();
    for m in found {
        match best.get(&m.id) {
            Some(prev) if prev.hamming <= m.hamming => {}
            _ => {
                best.insert(m.id, m);
            }
        }
    }
    let mut out: Vec<ArucoMarker> = best.into_values().collect();
    out.sort_by_key(|m| m.id);
    out
}
