//! The calibration frame loop.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::RgbImage;
use markercal_core::draw::{bitwise_not, flip_vertical, put_text, text_size, GREEN, RED};
use markercal_core::{GrayImage, ImageSize};
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::calibrate::{calibrate_camera, calibrate_fisheye, check_range, CalibrationOutcome};
use crate::camera::{CameraMatrix, Distortion};
use crate::draw::draw_chessboard_corners;
use crate::input::{InputError, InputSource};
use crate::pattern::{calc_board_corner_positions, find_pattern};
use crate::reprojection::compute_reprojection_errors;
use crate::result::{load_calibration_file, save_camera_params, CalibrationFile, ResultIoError};
use crate::settings::{InputType, Settings, SettingsError};
use crate::sink::FrameSink;
use crate::undistort::{
    estimate_new_camera_matrix_fisheye, get_optimal_new_camera_matrix,
    init_undistort_rectify_map, remap, undistort_image,
};

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("Invalid input detected. Application stopping.")]
    InvalidInput,
    #[error(transparent)]
    Input(#[from] InputError),
    #[error("failed to emit frame: {0}")]
    Sink(#[from] image::ImageError),
    #[error(transparent)]
    Result(#[from] ResultIoError),
}

/// State of the frame loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Only finding and drawing the pattern.
    Detection,
    /// Collecting views for calibration.
    Capturing,
    Calibrated,
}

/// What a run of [`CameraCalibration::init`] did.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionSummary {
    /// Frames handed to the sink, including undistorted replays.
    pub frames: usize,
    pub views_captured: usize,
    pub mode: Mode,
    /// Average reprojection error of the last successful calibration.
    pub avg_reprojection_error: Option<f64>,
}

/// Interactive-style calibration driven by a settings file.
#[derive(Clone, Debug)]
pub struct CameraCalibration {
    settings_path: PathBuf,
    calibration_path: PathBuf,
    camera_matrix: CameraMatrix,
    distortion: Distortion,
}

const TEXT_SCALE: u32 = 1;
const TEXT_BASELINE: i32 = 1;

impl CameraCalibration {
    /// `settings_path` drives [`Self::init`]; `calibration_path` is read by
    /// [`Self::load_calibration_file`].
    pub fn new(settings_path: impl Into<PathBuf>, calibration_path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: settings_path.into(),
            calibration_path: calibration_path.into(),
            camera_matrix: CameraMatrix::identity(),
            distortion: Distortion::default(),
        }
    }

    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    pub fn camera_matrix(&self) -> &CameraMatrix {
        &self.camera_matrix
    }

    pub fn distortion(&self) -> &Distortion {
        &self.distortion
    }

    /// Run the frame loop until the input is exhausted.
    ///
    /// Every frame is annotated with the detected pattern and a status line
    /// and pushed to `sink`. Once enough views are captured the camera is
    /// calibrated and the result written to `Write_outputFileName`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(settings = %self.settings_path.display()))
    )]
    pub fn init(&mut self, sink: &mut dyn FrameSink) -> Result<SessionSummary, SessionError> {
        log::info!("Initializing camera calibration process");
        let settings = Settings::load(&self.settings_path)?;
        if !settings.good_input {
            return Err(SessionError::InvalidInput);
        }
        let pattern = settings.pattern.ok_or(SessionError::InvalidInput)?;
        let board = settings.board_size();
        let skip = settings.skip.max(1) as usize;
        let mut source = match settings.input_type {
            InputType::ImageList => InputSource::image_list(settings.image_list.clone(), skip),
            InputType::VideoFile => InputSource::video(settings.resolve(&settings.input), skip)?,
            InputType::Camera => InputSource::camera(settings.camera_id),
            InputType::Invalid => return Err(SessionError::InvalidInput),
        };
        let capture = source.is_capture();
        let delay = Duration::from_millis(settings.delay.max(0) as u64);
        let nr_frames = settings.nr_frames.max(0) as usize;

        let mut image_points: Vec<Vec<Point2<f32>>> = Vec::new();
        let mut image_size = ImageSize::default();
        let mut mode = Mode::Capturing;
        let mut last_capture: Option<Instant> = None;
        let mut frames = 0usize;
        let mut avg_error = None;

        loop {
            let next = match source.next_image() {
                Ok(view) => view,
                Err(e) => {
                    log::warn!("stopping: {e}");
                    None
                }
            };

            if mode == Mode::Capturing && image_points.len() >= nr_frames {
                avg_error = self.run_calibration_and_save(&settings, image_size, &image_points)?;
                mode = if avg_error.is_some() {
                    Mode::Calibrated
                } else {
                    Mode::Detection
                };
            }
            let Some(mut view) = next else {
                if mode != Mode::Calibrated && !image_points.is_empty() {
                    avg_error =
                        self.run_calibration_and_save(&settings, image_size, &image_points)?;
                    if avg_error.is_some() {
                        mode = Mode::Calibrated;
                    }
                }
                break;
            };

            image_size = ImageSize::new(view.width(), view.height());
            if settings.flip_vertical {
                flip_vertical(&mut view);
            }

            let gray = GrayImage::from_rgb(
                view.width() as usize,
                view.height() as usize,
                view.as_raw(),
            );
            let mut blink = false;
            if let Some(points) = find_pattern(&gray.view(), board, pattern) {
                let delay_elapsed = last_capture.is_none_or(|t| t.elapsed() > delay);
                if mode == Mode::Capturing && (!capture || delay_elapsed) {
                    log::debug!("captured view {}", image_points.len() + 1);
                    image_points.push(points.clone());
                    last_capture = Some(Instant::now());
                    blink = capture;
                }
                draw_chessboard_corners(&mut view, board, &points, true);
            }

            self.draw_status(&mut view, &settings, mode, image_points.len());
            if blink {
                bitwise_not(&mut view);
            }
            if mode == Mode::Calibrated && settings.show_undistorted {
                view = self.get_undistorted_image(&view);
            }
            sink.push(&view)?;
            frames += 1;
        }

        if settings.input_type == InputType::ImageList
            && settings.show_undistorted
            && mode == Mode::Calibrated
        {
            frames += self.replay_undistorted(&settings, image_size, sink)?;
        }

        log::info!(
            "processed {frames} frames, {} views captured",
            image_points.len()
        );
        Ok(SessionSummary {
            frames,
            views_captured: image_points.len(),
            mode,
            avg_reprojection_error: avg_error,
        })
    }

    fn draw_status(&self, view: &mut RgbImage, settings: &Settings, mode: Mode, captured: usize) {
        let sizing_text = match mode {
            Mode::Capturing => "100/100",
            Mode::Calibrated => "Calibrated",
            Mode::Detection => "Detection",
        };
        let (tw, _) = text_size(sizing_text, TEXT_SCALE);
        let origin = (
            view.width() as i32 - 2 * tw as i32 - 10,
            view.height() as i32 - 2 * TEXT_BASELINE - 10,
        );
        let msg = match mode {
            Mode::Capturing if settings.show_undistorted => {
                format!("{captured}/{} Undist", settings.nr_frames)
            }
            Mode::Capturing => format!("{captured}/{}", settings.nr_frames),
            _ => sizing_text.to_string(),
        };
        let color = if mode == Mode::Calibrated { GREEN } else { RED };
        put_text(view, &msg, origin, TEXT_SCALE, color);
    }

    /// Re-read every listed image and push it undistorted with a camera
    /// matrix that keeps all source pixels.
    fn replay_undistorted(
        &self,
        settings: &Settings,
        image_size: ImageSize,
        sink: &mut dyn FrameSink,
    ) -> Result<usize, SessionError> {
        let new_camera = if self.distortion.is_fisheye() {
            estimate_new_camera_matrix_fisheye(
                &self.camera_matrix,
                &self.distortion,
                image_size,
                1.0,
            )
        } else {
            get_optimal_new_camera_matrix(&self.camera_matrix, &self.distortion, image_size, 1.0)
        };
        let map = init_undistort_rectify_map(
            &self.camera_matrix,
            &self.distortion,
            &new_camera,
            image_size,
        );
        let mut pushed = 0;
        for path in &settings.image_list {
            let view = match image::open(path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    log::warn!("skipping {}: {e}", path.display());
                    continue;
                }
            };
            sink.push(&remap(&view, &map))?;
            pushed += 1;
        }
        Ok(pushed)
    }

    fn run_calibration(
        &self,
        settings: &Settings,
        image_size: ImageSize,
        image_points: &[Vec<Point2<f32>>],
    ) -> Option<(CalibrationOutcome, Vec<f64>, f64, bool)> {
        let pattern = settings.pattern?;
        let object = calc_board_corner_positions(settings.board_size(), settings.square_size, pattern);
        let object_points = vec![object; image_points.len()];

        let outcome = if settings.use_fisheye {
            calibrate_fisheye(&object_points, image_points, image_size, settings.flags)
        } else {
            calibrate_camera(
                &object_points,
                image_points,
                image_size,
                settings.flags,
                settings.aspect_ratio as f64,
            )
        };
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                log::warn!("calibration error: {e}");
                return None;
            }
        };
        log::info!(
            "Re-projection error reported by calibration: {}",
            outcome.rms
        );

        let k = outcome.camera_matrix.rows();
        let ok = check_range(k.as_flattened()) && check_range(outcome.distortion.coefficients());
        let (total, per_view) = compute_reprojection_errors(
            &object_points,
            image_points,
            &outcome.rvecs,
            &outcome.tvecs,
            &outcome.camera_matrix,
            &outcome.distortion,
        );
        Some((outcome, per_view, total, ok))
    }

    /// Calibrate from the captured views and, on success, write the result
    /// file. Returns the average reprojection error when calibration
    /// succeeded.
    pub fn run_calibration_and_save(
        &mut self,
        settings: &Settings,
        image_size: ImageSize,
        image_points: &[Vec<Point2<f32>>],
    ) -> Result<Option<f64>, SessionError> {
        let run = self.run_calibration(settings, image_size, image_points);
        let (ok, total) = match &run {
            Some((_, _, total, ok)) => (*ok, *total),
            None => (false, 0.0),
        };
        log::info!(
            "{}. avg re projection error = {total}",
            if ok {
                "Calibration succeeded"
            } else {
                "Calibration failed"
            }
        );
        let Some((outcome, per_view, total, true)) = run else {
            return Ok(None);
        };

        self.camera_matrix = outcome.camera_matrix;
        self.distortion = outcome.distortion;
        let file = CalibrationFile::from_run(
            settings,
            image_size,
            &outcome,
            &per_view,
            total,
            image_points,
        );
        save_camera_params(&settings.output_file_name, &file)?;
        Ok(Some(total))
    }

    /// Undistort a frame with the current calibration.
    pub fn get_undistorted_image(&self, frame: &RgbImage) -> RgbImage {
        undistort_image(frame, &self.camera_matrix, &self.distortion)
    }

    /// Load `camera_matrix` and `distortion_coefficients` from the
    /// calibration file given at construction.
    pub fn load_calibration_file(&mut self) -> Result<(), SessionError> {
        let (k, d) = load_calibration_file(&self.calibration_path)?;
        self.camera_matrix = k;
        self.distortion = d;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::synthetic::{chessboard_plane, render_warped};
    use markercal_core::Homography;
    use nalgebra::{Matrix3, Rotation3, Vector3};

    const W: usize = 6;
    const H: usize = 4;
    const SQUARE: f64 = 25.0;
    const IMG_W: usize = 480;
    const IMG_H: usize = 360;

    fn truth() -> CameraMatrix {
        CameraMatrix::new(500.0, 500.0, 239.5, 179.5)
    }

    /// Plane (unit squares, inner corner (j, i) at (j + 1, i + 1)) to image.
    fn plane_to_image(rvec: Vector3<f64>, depth: f64) -> Homography {
        let r = Rotation3::from_scaled_axis(rvec);
        let center = Vector3::new(
            (W - 1) as f64 * SQUARE / 2.0,
            (H - 1) as f64 * SQUARE / 2.0,
            0.0,
        );
        let t = Vector3::new(0.0, 0.0, depth) - r * center;
        let m = r.matrix();
        let rt = Matrix3::new(
            m[(0, 0)], m[(0, 1)], t.x, //
            m[(1, 0)], m[(1, 1)], t.y, //
            m[(2, 0)], m[(2, 1)], t.z,
        );
        let to_mm = Matrix3::new(
            SQUARE, 0.0, -SQUARE, //
            0.0, SQUARE, -SQUARE, //
            0.0, 0.0, 1.0,
        );
        Homography::new(truth().matrix() * rt * to_mm)
    }

    fn write_views(dir: &Path) -> Vec<PathBuf> {
        let poses = [
            (Vector3::new(0.20, -0.15, 0.05), 330.0),
            (Vector3::new(-0.25, 0.10, -0.10), 360.0),
            (Vector3::new(0.10, 0.30, 0.12), 350.0),
            (Vector3::new(-0.15, -0.25, 0.0), 380.0),
            (Vector3::new(0.30, 0.20, -0.08), 400.0),
        ];
        poses
            .iter()
            .enumerate()
            .map(|(k, (rvec, depth))| {
                let hm = plane_to_image(*rvec, *depth);
                let gray = render_warped(IMG_W, IMG_H, &hm, chessboard_plane(W, H));
                let img = image::GrayImage::from_raw(IMG_W as u32, IMG_H as u32, gray.data)
                    .expect("buffer size");
                let path = dir.join(format!("view{k}.png"));
                img.save(&path).expect("save view");
                path
            })
            .collect()
    }

    fn write_settings(dir: &Path, input: &Path, output: &Path) -> PathBuf {
        let text = format!(
            "%YAML:1.0\n---\nSettings:\n  BoardSize_Width: {W}\n  BoardSize_Height: {H}\n  \
             Square_Size: {SQUARE}\n  Calibrate_Pattern: \"CHESSBOARD\"\n  \
             Calibrate_NrOfFrameToUse: 5\n  Calibrate_FixAspectRatio: 0\n  \
             Calibrate_AssumeZeroTangentialDistortion: 1\n  \
             Calibrate_FixPrincipalPointAtTheCenter: 1\n  Fix_K3: 1\n  \
             Write_DetectedFeaturePoints: 1\n  Write_extrinsicParameters: 1\n  \
             Write_outputFileName: \"{}\"\n  Show_UndistortedImage: 1\n  \
             Input_FlipAroundHorizontalAxis: 0\n  Input_Delay: 0\n  Input_Skip: 1\n  \
             Input: \"{}\"\n",
            output.display(),
            input.display()
        );
        let path = dir.join("default.yml");
        std::fs::write(&path, text).expect("write settings");
        path
    }

    #[test]
    fn image_list_session_calibrates_and_saves() {
        let dir = tempfile::tempdir().expect("tempdir");
        let views = write_views(dir.path());
        let list = dir.path().join("images.yml");
        let mut list_text = String::from("%YAML:1.0\n---\nimages:\n");
        for v in &views {
            list_text.push_str(&format!("  - \"{}\"\n", v.display()));
        }
        std::fs::write(&list, list_text).expect("write list");
        let output = dir.path().join("out_camera_data.yml");
        let settings = write_settings(dir.path(), &list, &output);

        let mut session = CameraCalibration::new(&settings, &output);
        let mut frames: Vec<RgbImage> = Vec::new();
        let summary = session.init(&mut frames).expect("session");

        assert_eq!(summary.mode, Mode::Calibrated);
        assert!(summary.views_captured >= 4, "{summary:?}");
        assert_eq!(summary.frames, views.len() * 2);
        assert_eq!(frames.len(), summary.frames);
        let err = summary.avg_reprojection_error.expect("calibrated");
        assert!(err < 0.5, "avg error {err}");

        let text = std::fs::read_to_string(&output).expect("result file");
        assert!(text.contains(&format!("nr_of_frames: {}", summary.views_captured)));
        assert!(text.contains("# flags: +fix_principal_point +zero_tangent_dist +fix_k3"));

        let mut reloaded = CameraCalibration::new(&settings, &output);
        reloaded.load_calibration_file().expect("load");
        let k = reloaded.camera_matrix();
        assert!((k.fx - 500.0).abs() < 15.0, "fx {}", k.fx);
        assert!((k.fy - 500.0).abs() < 15.0, "fy {}", k.fy);
        assert_eq!(k.cx, 239.5);
        assert_eq!(k, session.camera_matrix());
    }

    #[test]
    fn missing_settings_file_reports_path() {
        let mut session = CameraCalibration::new("/no/such/default.yml", "out.yml");
        let err = session.init(&mut crate::sink::NullSink).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Could not open the configuration file: \"/no/such/default.yml\""
        );
    }

    #[test]
    fn bad_input_stops_the_application() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("out.yml");
        let settings = write_settings(dir.path(), &dir.path().join("missing.avi"), &output);
        let mut session = CameraCalibration::new(&settings, &output);
        let err = session.init(&mut crate::sink::NullSink).unwrap_err();
        assert!(matches!(err, SessionError::InvalidInput));
        assert_eq!(
            err.to_string(),
            "Invalid input detected. Application stopping."
        );
    }

    #[test]
    fn status_line_reports_progress() {
        let session = CameraCalibration::new("s.yml", "c.yml");
        let settings = Settings {
            nr_frames: 25,
            ..Default::default()
        };
        let mut view = RgbImage::new(200, 60);
        session.draw_status(&mut view, &settings, Mode::Capturing, 3);
        assert!(view.pixels().any(|p| *p == RED));
        let mut view = RgbImage::new(200, 60);
        session.draw_status(&mut view, &settings, Mode::Calibrated, 3);
        assert!(view.pixels().any(|p| *p == GREEN));
    }
}
