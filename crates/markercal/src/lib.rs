//! High-level facade crate for the `markercal-*` workspace.
//!
//! This crate provides:
//! - re-exports of the marker detector, the calibration pipeline and the
//!   shared core types,
//! - the [`Table`] model: a work area anchored by markers `0..4` and
//!   rectified into a fixed-size view,
//! - two binaries (feature `cli`): `aruco-demo` and `camera-calibration`.
//!
//! ## Quickstart
//!
//! ```no_run
//! use markercal::aruco::{create_dictionary, ArucoDetector, DetectorParameters};
//! use markercal::core::GrayImage;
//! use markercal::Table;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = image::open("frame.png")?.to_rgb8();
//! let gray = GrayImage::from_rgb(frame.width() as usize, frame.height() as usize, frame.as_raw());
//!
//! let dict = create_dictionary("data/aruco-dict.yml", 5)?;
//! let detector = ArucoDetector::new(dict, DetectorParameters::default())?;
//! let found = detector.detect(&gray.view()).found;
//!
//! let mut table = Table::new(1200, 600)?;
//! table.update_table_on_frame(&found);
//! let view = table.get_table_from_frame(&frame);
//! view.save("table.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `markercal::core`: gray images, homographies, drawing, logging.
//! - `markercal::aruco`: dictionaries, detector parameters, marker detection.
//! - `markercal::calib`: settings, input sources, pattern finders,
//!   calibration, undistortion, the calibration session.

pub use markercal_aruco as aruco;
pub use markercal_calib as calib;
pub use markercal_core as core;

pub use markercal_aruco::{ArucoDetector, ArucoMarker, DetectorParameters, Dictionary};
pub use markercal_calib::{CameraCalibration, FrameSink, NullSink, PngSequenceSink, Settings};

#[cfg(feature = "cli")]
pub mod cli;
mod table;

pub use table::{Table, TableError, TABLE_CORNERS};
