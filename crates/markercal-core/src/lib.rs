//! Core types and utilities shared by the `markercal-*` crates.
//!
//! Algorithms work on plain row-major gray buffers ([`GrayImage`]). Frame
//! annotation in [`draw`] works on `image::RgbImage`.

pub mod draw;
mod homography;
mod gray;
mod logger;
mod threshold;

pub use homography::{
    estimate_homography, homography_from_4pt, warp_perspective_gray, warp_perspective_rgb, Homography,
    HomographyError,
};
pub use gray::{
    sample_bilinear, sample_bilinear_clamped, sample_bilinear_u8, GrayImage, GrayImageView,
    ImageSize,
};

pub use threshold::{otsu_threshold_from_samples, std_dev};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_from_verbosity;
