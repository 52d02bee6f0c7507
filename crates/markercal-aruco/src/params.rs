use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::dictionary::strip_yaml_directives;

#[derive(thiserror::Error, Debug)]
pub enum ParamsError {
    #[error("failed to read detector parameters {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid detector parameters yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid detector parameters json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid parameter {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Marker detector tuning, using the key names of OpenCV's detector
/// parameter files. Missing keys take OpenCV's defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DetectorParameters {
    pub adaptive_thresh_win_size_min: usize,
    pub adaptive_thresh_win_size_max: usize,
    pub adaptive_thresh_win_size_step: usize,
    pub adaptive_thresh_constant: f32,
    /// Minimum contour perimeter relative to the largest image side.
    pub min_marker_perimeter_rate: f32,
    pub max_marker_perimeter_rate: f32,
    /// Polygon approximation tolerance relative to the contour length.
    pub polygonal_approx_accuracy_rate: f32,
    /// Minimum quad edge relative to the quad perimeter.
    pub min_corner_distance_rate: f32,
    /// Minimum distance of any quad corner to the image border, in pixels.
    pub min_distance_to_border: u32,
    pub min_marker_distance_rate: f32,
    pub marker_border_bits: usize,
    pub perspective_remove_pixel_per_cell: usize,
    pub perspective_remove_ignored_margin_per_cell: f32,
    pub max_erroneous_bits_in_border_rate: f32,
    pub min_otsu_std_dev: f32,
    pub error_correction_rate: f32,
    /// Also try inverted markers (white border on black).
    pub detect_inverted_marker: bool,
}

impl Default for DetectorParameters {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_win_size_step: 10,
            adaptive_thresh_constant: 7.0,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            polygonal_approx_accuracy_rate: 0.03,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3,
            min_marker_distance_rate: 0.05,
            marker_border_bits: 1,
            perspective_remove_pixel_per_cell: 4,
            perspective_remove_ignored_margin_per_cell: 0.13,
            max_erroneous_bits_in_border_rate: 0.35,
            min_otsu_std_dev: 5.0,
            error_correction_rate: 0.6,
            detect_inverted_marker: false,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ParamsError {
    ParamsError::Invalid {
        name,
        reason: reason.into(),
    }
}

impl DetectorParameters {
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.adaptive_thresh_win_size_min < 3 {
            return Err(invalid("adaptiveThreshWinSizeMin", "must be >= 3"));
        }
        if self.adaptive_thresh_win_size_max < self.adaptive_thresh_win_size_min {
            return Err(invalid(
                "adaptiveThreshWinSizeMax",
                "must be >= adaptiveThreshWinSizeMin",
            ));
        }
        if self.adaptive_thresh_win_size_step == 0 {
            return Err(invalid("adaptiveThreshWinSizeStep", "must be > 0"));
        }
        if !(self.min_marker_perimeter_rate > 0.0
            && self.max_marker_perimeter_rate > self.min_marker_perimeter_rate)
        {
            return Err(invalid(
                "maxMarkerPerimeterRate",
                "need 0 < minMarkerPerimeterRate < maxMarkerPerimeterRate",
            ));
        }
        if self.polygonal_approx_accuracy_rate <= 0.0 {
            return Err(invalid("polygonalApproxAccuracyRate", "must be > 0"));
        }
        if self.marker_border_bits == 0 {
            return Err(invalid("markerBorderBits", "must be >= 1"));
        }
        if self.perspective_remove_pixel_per_cell == 0 {
            return Err(invalid("perspectiveRemovePixelPerCell", "must be >= 1"));
        }
        if !(0.0..0.5).contains(&self.perspective_remove_ignored_margin_per_cell) {
            return Err(invalid(
                "perspectiveRemoveIgnoredMarginPerCell",
                "must be in [0, 0.5)",
            ));
        }
        if !(0.0..=1.0).contains(&self.error_correction_rate) {
            return Err(invalid("errorCorrectionRate", "must be in [0, 1]"));
        }
        if self.max_erroneous_bits_in_border_rate < 0.0 {
            return Err(invalid("maxErroneousBitsInBorderRate", "must be >= 0"));
        }
        Ok(())
    }

    /// Window sizes tried by the candidate search, smallest first.
    pub fn window_sizes(&self) -> Vec<usize> {
        let step = self.adaptive_thresh_win_size_step.max(1);
        let mut sizes: Vec<usize> = (self.adaptive_thresh_win_size_min
            ..=self.adaptive_thresh_win_size_max)
            .step_by(step)
            .map(|w| w | 1)
            .collect();
        sizes.dedup();
        sizes
    }
}

/// Read detector parameters from a YAML (`.yml`/`.yaml`) or JSON file and
/// validate them.
pub fn load_parameters_from_file(path: impl AsRef<Path>) -> Result<DetectorParameters, ParamsError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ParamsError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let params: DetectorParameters = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text)?,
        _ => {
            let body = strip_yaml_directives(&text);
            if body.trim().is_empty() || body.trim() == "---" {
                DetectorParameters::default()
            } else {
                serde_yaml::from_str(&body)?
            }
        }
    };
    params.validate()?;
    Ok(params)
}
