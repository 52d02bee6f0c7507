//! Square fiducial marker detection.
//!
//! The pipeline follows the classic ArUco recipe:
//! - adaptive thresholding at several window sizes,
//! - border following and polygon approximation to convex quads,
//! - perspective removal and cell voting,
//! - dictionary lookup up to rotation with bounded Hamming distance.
//!
//! Dictionaries are read from files ([`create_dictionary`]); detector tuning
//! comes from [`DetectorParameters`], usually loaded with
//! [`load_parameters_from_file`].
//!
//! ```no_run
//! use markercal_aruco::{create_dictionary, detect_aruco_on_frame, DetectorParameters};
//! use markercal_core::GrayImage;
//!
//! let dict = create_dictionary("data/aruco-dict.yml", 5)?;
//! let frame = GrayImage::filled(640, 480, 255);
//! let found = detect_aruco_on_frame(&frame.view(), &dict, &DetectorParameters::default())?;
//! println!("{} markers", found.found.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod contours;
mod decode;
mod detector;
mod dictionary;
mod draw;
mod geometry;
mod matcher;
mod params;
mod threshold;

pub use contours::{find_contours, Contour};
pub use decode::MarkerObservation;
pub use detector::{detect_aruco_on_frame, ArucoDetector, ArucoMarker, Detections};
pub use dictionary::{create_dictionary, Dictionary, DictionaryError, MAX_MARKER_SIZE};
pub use draw::{draw_markers_on_frame, draw_rejected_on_frame};
pub use geometry::{
    approx_poly_dp, is_contour_convex, min_edge_length, perimeter, perimeter_f32, signed_area_f32,
};
pub use matcher::{rotate_code_u64, Match, Matcher};
pub use params::{load_parameters_from_file, DetectorParameters, ParamsError};
pub use threshold::{adaptive_threshold_mean, otsu_threshold_from_samples, std_dev};
