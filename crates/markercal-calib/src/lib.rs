//! Planar-target camera calibration.
//!
//! ## Quickstart
//!
//! ```no_run
//! use markercal_calib::{CameraCalibration, PngSequenceSink};
//!
//! let mut session = CameraCalibration::new("default.yml", "out_camera_data.yml");
//! let mut sink = PngSequenceSink::new("frames")?;
//! let summary = session.init(&mut sink)?;
//! println!("{} views, avg error {:?}", summary.views_captured, summary.avg_reprojection_error);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Pipeline of a calibration session:
//! 1. Load and validate [`Settings`]; infer the input type (image list,
//!    frame sequence, camera).
//! 2. For every frame, find the pattern:
//!    - chessboards via a ChESS corner response, a kiddo-backed grid graph
//!      and gradient-based sub-pixel refinement,
//!    - circle grids via blob detection and lattice fitting.
//! 3. Collect views until `Calibrate_NrOfFrameToUse` is reached.
//! 4. Calibrate: Zhang initialisation, per-view poses, then a joint
//!    Levenberg–Marquardt refinement (pinhole rational or fisheye model).
//! 5. Compute reprojection errors and write the result file.
//! 6. Optionally emit undistorted frames.

mod calibrate;
mod camera;
mod draw;
pub mod flags;
mod input;
mod lm;
pub mod pattern;
mod reprojection;
mod result;
mod session;
mod settings;
mod sink;
mod undistort;

pub use calibrate::{
    calibrate_camera, calibrate_fisheye, check_range, CalibrationError, CalibrationOutcome,
};
pub use camera::{
    project_points, rodrigues, rotation_to_rvec, undistort_point, CameraMatrix, Distortion,
};
pub use draw::draw_chessboard_corners;
pub use input::{read_string_list, FrameStore, InputError, InputSource};
pub use lm::{levenberg_marquardt, LeastSquaresProblem, LmOptions, LmReport, Termination};
pub use pattern::{
    calc_board_corner_positions, corner_sub_pix, find_chessboard_corners, find_circles_grid,
    find_pattern, BoardSize, Pattern,
};
pub use reprojection::compute_reprojection_errors;
pub use result::{
    load_calibration_file, save_camera_params, utc_timestamp, CalibrationFile, ResultIoError,
};
pub use session::{CameraCalibration, Mode, SessionError, SessionSummary};
pub use settings::{InputType, Settings, SettingsError};
pub use sink::{FrameSink, NullSink, PngSequenceSink};
pub use undistort::{
    estimate_new_camera_matrix_fisheye, get_optimal_new_camera_matrix,
    init_undistort_rectify_map, remap, undistort_image, UndistortMap,
};
