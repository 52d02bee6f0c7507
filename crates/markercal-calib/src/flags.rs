//! Calibration flag bits, numerically compatible with OpenCV files.

/// Flags for the pinhole (Brown–Conrady / rational) model.
pub mod pinhole {
    pub const USE_INTRINSIC_GUESS: i32 = 0x0001;
    pub const FIX_ASPECT_RATIO: i32 = 0x0002;
    pub const FIX_PRINCIPAL_POINT: i32 = 0x0004;
    pub const ZERO_TANGENT_DIST: i32 = 0x0008;
    pub const FIX_K1: i32 = 0x0020;
    pub const FIX_K2: i32 = 0x0040;
    pub const FIX_K3: i32 = 0x0080;
    pub const FIX_K4: i32 = 0x0800;
    pub const FIX_K5: i32 = 0x1000;
    pub const FIX_K6: i32 = 0x2000;
    pub const RATIONAL_MODEL: i32 = 0x4000;
}

/// Flags for the equidistant fisheye model.
pub mod fisheye {
    pub const USE_INTRINSIC_GUESS: i32 = 1 << 0;
    pub const RECOMPUTE_EXTRINSIC: i32 = 1 << 1;
    pub const CHECK_COND: i32 = 1 << 2;
    pub const FIX_SKEW: i32 = 1 << 3;
    pub const FIX_K1: i32 = 1 << 4;
    pub const FIX_K2: i32 = 1 << 5;
    pub const FIX_K3: i32 = 1 << 6;
    pub const FIX_K4: i32 = 1 << 7;
    pub const FIX_INTRINSIC: i32 = 1 << 8;
    pub const FIX_PRINCIPAL_POINT: i32 = 1 << 9;
}

#[inline]
pub(crate) fn has(flags: i32, bit: i32) -> bool {
    flags & bit != 0
}
