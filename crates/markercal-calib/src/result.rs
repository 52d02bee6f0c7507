//! Calibration result files.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use markercal_core::ImageSize;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::calibrate::CalibrationOutcome;
use crate::camera::{CameraMatrix, Distortion};
use crate::settings::{strip_yaml_directives, Settings};

#[derive(thiserror::Error, Debug)]
pub enum ResultIoError {
    #[error("failed to access calibration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid calibration yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid calibration json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("calibration file has no usable `{0}`")]
    MissingKey(&'static str),
}

const EXTRINSICS_COMMENT: &str =
    "a set of 6-tuples (rotation vector + translation vector) for each view";

/// Everything written after a successful calibration, in file order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    /// UTC time, `YYYY-MM-DDTHH:MM:SSZ`.
    pub calibration_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nr_of_frames: Option<usize>,
    pub image_width: u32,
    pub image_height: u32,
    pub board_width: i32,
    pub board_height: i32,
    pub square_size: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_aspect_ratio: Option<f32>,
    /// Written as a YAML comment above `flags`; a plain key in JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags_comment: Option<String>,
    pub flags: i32,
    pub fisheye_model: bool,
    pub camera_matrix: [[f64; 3]; 3],
    pub distortion_coefficients: Vec<f64>,
    pub avg_reprojection_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_view_reprojection_errors: Option<Vec<f32>>,
    /// One `[rx, ry, rz, tx, ty, tz]` row per view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extrinsic_parameters: Option<Vec<[f64; 6]>>,
    /// Detected features, one row of `[x, y]` per view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_points: Option<Vec<Vec<[f32; 2]>>>,
}

impl CalibrationFile {
    /// Collect a run's results. Per-view errors and extrinsics are kept only
    /// with `Write_extrinsicParameters`, image points only with
    /// `Write_DetectedFeaturePoints`.
    pub fn from_run(
        settings: &Settings,
        image_size: ImageSize,
        outcome: &CalibrationOutcome,
        per_view_errors: &[f64],
        avg_error: f64,
        image_points: &[Vec<Point2<f32>>],
    ) -> Self {
        let views = outcome.rvecs.len().max(per_view_errors.len());
        let fix_aspect = settings.aspect_ratio != 0.0 && !settings.use_fisheye;

        let per_view = (settings.write_extrinsics && !per_view_errors.is_empty())
            .then(|| per_view_errors.iter().map(|&e| e as f32).collect());
        let extrinsics = (settings.write_extrinsics
            && !outcome.rvecs.is_empty()
            && !outcome.tvecs.is_empty())
        .then(|| {
            outcome
                .rvecs
                .iter()
                .zip(&outcome.tvecs)
                .map(|(r, t)| [r.x, r.y, r.z, t.x, t.y, t.z])
                .collect()
        });
        let points = (settings.write_points && !image_points.is_empty()).then(|| {
            image_points
                .iter()
                .map(|view| view.iter().map(|p| [p.x, p.y]).collect())
                .collect()
        });

        Self {
            calibration_time: utc_timestamp(SystemTime::now()),
            nr_of_frames: (views > 0).then_some(views),
            image_width: image_size.width,
            image_height: image_size.height,
            board_width: settings.board_width,
            board_height: settings.board_height,
            square_size: settings.square_size,
            fix_aspect_ratio: fix_aspect.then_some(settings.aspect_ratio),
            flags_comment: settings.flags_comment(),
            flags: settings.flags,
            fisheye_model: settings.use_fisheye,
            camera_matrix: outcome.camera_matrix.rows(),
            distortion_coefficients: outcome.distortion.coefficients().to_vec(),
            avg_reprojection_error: avg_error,
            per_view_reprojection_errors: per_view,
            extrinsic_parameters: extrinsics,
            image_points: points,
        }
    }

    /// YAML text with a `%YAML:1.0` header and the flag and extrinsics
    /// descriptions as comments.
    pub fn to_yaml(&self) -> Result<String, ResultIoError> {
        let plain = Self {
            flags_comment: None,
            ..self.clone()
        };
        let body = serde_yaml::to_string(&plain)?;
        let mut out = String::from("%YAML:1.0\n---\n");
        for line in body.lines() {
            if line.starts_with("flags:") {
                if let Some(comment) = &self.flags_comment {
                    out.push_str("# ");
                    out.push_str(comment);
                    out.push('\n');
                }
            } else if line.starts_with("extrinsic_parameters:") {
                out.push_str("# ");
                out.push_str(EXTRINSICS_COMMENT);
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }
}

/// Write a calibration file, YAML or JSON by extension.
pub fn save_camera_params(
    path: impl AsRef<Path>,
    file: &CalibrationFile,
) -> Result<(), ResultIoError> {
    let path = path.as_ref();
    let text = if is_json(path) {
        serde_json::to_string_pretty(file)?
    } else {
        file.to_yaml()?
    };
    std::fs::write(path, text).map_err(|source| ResultIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    log::info!("wrote calibration to {}", path.display());
    Ok(())
}

/// Read `camera_matrix` and `distortion_coefficients` from a calibration
/// file.
///
/// Matrices may be plain nested lists, flat lists, or OpenCV
/// `!!opencv-matrix` mappings with a `data` list. The distortion model is
/// taken from `fisheye_model` when present.
pub fn load_calibration_file(
    path: impl AsRef<Path>,
) -> Result<(CameraMatrix, Distortion), ResultIoError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| ResultIoError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let root: Value = if is_json(path) {
        serde_json::from_str(&text)?
    } else {
        serde_yaml::from_str(&strip_yaml_directives(&text))?
    };

    let k = root
        .get("camera_matrix")
        .and_then(numbers)
        .filter(|v| v.len() == 9)
        .ok_or(ResultIoError::MissingKey("camera_matrix"))?;
    let camera = CameraMatrix::from_rows(&[[k[0], k[1], k[2]], [k[3], k[4], k[5]], [k[6], k[7], k[8]]]);

    let fisheye = match root.get("fisheye_model") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|v| v != 0.0),
        _ => false,
    };
    let dist = root
        .get("distortion_coefficients")
        .and_then(numbers)
        .and_then(|d| Distortion::from_coefficients(&d, fisheye))
        .ok_or(ResultIoError::MissingKey("distortion_coefficients"))?;
    Ok((camera, dist))
}

fn numbers(v: &Value) -> Option<Vec<f64>> {
    match v {
        Value::Tagged(t) => numbers(&t.value),
        Value::Mapping(_) => v.get("data").and_then(numbers),
        Value::Sequence(items) => {
            let mut out = Vec::new();
            for item in items {
                out.extend(numbers(item)?);
            }
            Some(out)
        }
        Value::Number(n) => n.as_f64().map(|x| vec![x]),
        _ => None,
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// `YYYY-MM-DDTHH:MM:SSZ` for a system time.
pub fn utc_timestamp(t: SystemTime) -> String {
    let secs = t
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let days = secs.div_euclid(86_400);
    let rem = secs.rem_euclid(86_400);
    let (y, m, d) = civil_from_days(days);
    format!(
        "{y:04}-{m:02}-{d:02}T{:02}:{:02}:{:02}Z",
        rem / 3600,
        rem % 3600 / 60,
        rem % 60
    )
}

/// Proleptic Gregorian date of a day count since 1970-01-01.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let y = yoe + era * 400 + i64::from(m <= 2);
    (y, m, d)
}
