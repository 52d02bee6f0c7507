//! Bit extraction from a marker candidate quad.

use markercal_core::{homography_from_4pt, sample_bilinear, GrayImage, GrayImageView};
use nalgebra::Point2;

use crate::params::DetectorParameters;
use crate::threshold::{otsu_threshold_from_samples, std_dev};
use crate::{Match, Matcher};

/// Observed bits of one candidate before dictionary lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkerObservation {
    /// Inner bits, row-major, white = 1.
    pub code: u64,
    pub border_errors: usize,
    pub inverted: bool,
}

/// Warps candidate quads into a canonical patch and reads their cells.
pub(crate) struct CandidateDecoder<'a> {
    matcher: &'a Matcher,
    marker_size: usize,
    border: usize,
    cell_px: usize,
    margin_px: usize,
    min_std_dev: f32,
    max_border_errors: usize,
    try_inverted: bool,
}

impl<'a> CandidateDecoder<'a> {
    pub(crate) fn new(params: &DetectorParameters, matcher: &'a Matcher) -> Self {
        let marker_size = matcher.marker_size();
        let cell_px = params.perspective_remove_pixel_per_cell.max(1);
        Self {
            matcher,
            marker_size,
            border: params.marker_border_bits.max(1),
            cell_px,
            margin_px: (params.perspective_remove_ignored_margin_per_cell * cell_px as f32) as usize,
            min_std_dev: params.min_otsu_std_dev,
            max_border_errors: ((marker_size * marker_size) as f32
                * params.max_erroneous_bits_in_border_rate) as usize,
            try_inverted: params.detect_inverted_marker,
        }
    }

    fn cells(&self) -> usize {
        self.marker_size + 2 * self.border
    }

    /// Resample the quad (clockwise, image coordinates) into a square patch.
    pub(crate) fn extract_patch(
        &self,
        gray: &GrayImageView<'_>,
        quad: &[Point2<f32>; 4],
    ) -> Option<GrayImage> {
        let side = self.cells() * self.cell_px;
        let s = side as f64;
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ];
        let dst = quad.map(|p| Point2::new(p.x as f64, p.y as f64));
        let h = homography_from_4pt(&src, &dst).ok()?;

        let mut patch = GrayImage::new(side, side);
        for y in 0..side {
            for x in 0..side {
                let p = h.apply(Point2::new(x as f64 + 0.5, y as f64 + 0.5));
                let v = sample_bilinear(gray, p.x as f32, p.y as f32);
                patch.set(x, y, v.round().clamp(0.0, 255.0) as u8);
            }
        }
        Some(patch)
    }

    /// Threshold the patch and read every cell, border included.
    pub(crate) fn read_bits(&self, patch: &GrayImage) -> Option<MarkerObservation> {
        if std_dev(&patch.data) < self.min_std_dev {
            return None;
        }
        let thr = otsu_threshold_from_samples(&patch.data);
        let cells = self.cells();

        let inner = self.cell_px - 2 * self.margin_px.min((self.cell_px - 1) / 2);
        let offset = (self.cell_px - inner) / 2;
        let mut white = vec![false; cells * cells];
        for cy in 0..cells {
            for cx in 0..cells {
                let x0 = cx * self.cell_px + offset;
                let y0 = cy * self.cell_px + offset;
                let mut count = 0;
                for y in y0..y0 + inner {
                    for x in x0..x0 + inner {
                        if patch.get(x, y) >= thr {
                            count += 1;
                        }
                    }
                }
                white[cy * cells + cx] = count * 2 > inner * inner;
            }
        }

        let observe = |inverted: bool| {
            let mut code = 0u64;
            let mut border_errors = 0;
            for cy in 0..cells {
                for cx in 0..cells {
                    let is_white = white[cy * cells + cx] != inverted;
                    let on_border = cx < self.border
                        || cy < self.border
                        || cx >= cells - self.border
                        || cy >= cells - self.border;
                    if on_border {
                        border_errors += is_white as usize;
                    } else if is_white {
                        let idx = (cy - self.border) * self.marker_size + (cx - self.border);
                        code |= 1 << idx;
                    }
                }
            }
            MarkerObservation {
                code,
                border_errors,
                inverted,
            }
        };

        let normal = observe(false);
        if normal.border_errors <= self.max_border_errors {
            return Some(normal);
        }
        if self.try_inverted {
            let inv = observe(true);
            if inv.border_errors <= self.max_border_errors {
                return Some(inv);
            }
        }
        None
    }

    pub(crate) fn decode(
        &self,
        gray: &GrayImageView<'_>,
        quad: &[Point2<f32>; 4],
    ) -> Option<(MarkerObservation, Match)> {
        let patch = self.extract_patch(gray, quad)?;
        let obs = self.read_bits(&patch)?;
        let m = self.matcher.match_code(obs.code)?;
        Some((obs, m))
    }
}
