//! Local thresholding.

use markercal_core::{GrayImage, GrayImageView};

pub use markercal_core::{otsu_threshold_from_samples, std_dev};

/// Summed-area table with one row/column of zero padding.
struct Integral {
    stride: usize,
    sums: Vec<u64>,
}

impl Integral {
    fn new(img: &GrayImageView<'_>) -> Self {
        let stride = img.width + 1;
        let mut sums = vec![0u64; stride * (img.height + 1)];
        for y in 0..img.height {
            let mut row = 0u64;
            for x in 0..img.width {
                row += img.data[y * img.width + x] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self { stride, sums }
    }

    /// Sum over `[x0, x1) x [y0, y1)`.
    #[inline]
    fn rect(&self, x0: usize, y0: usize, x1: usize, y1: usize) -> u64 {
        let s = self.stride;
        self.sums[y1 * s + x1] + self.sums[y0 * s + x0]
            - self.sums[y0 * s + x1]
            - self.sums[y1 * s + x0]
    }
}

/// Inverted mean adaptive threshold.
///
/// A pixel becomes 255 when it is darker than the mean of its `win x win`
/// neighbourhood minus `c`, and 0 otherwise. The window is cropped at the
/// image border.
pub fn adaptive_threshold_mean(src: &GrayImageView<'_>, win: usize, c: f32) -> GrayImage {
    let mut out = GrayImage::new(src.width, src.height);
    if src.width == 0 || src.height == 0 {
        return out;
    }
    let integral = Integral::new(src);
    let r = (win.max(3) | 1) / 2;

    for y in 0..src.height {
        let y0 = y.saturating_sub(r);
        let y1 = (y + r + 1).min(src.height);
        for x in 0..src.width {
            let x0 = x.saturating_sub(r);
            let x1 = (x + r + 1).min(src.width);
            let area = ((x1 - x0) * (y1 - y0)) as f32;
            let mean = integral.rect(x0, y0, x1, y1) as f32 / area;
            if (src.get(x, y) as f32) < mean - c {
                out.set(x, y, 255);
            }
        }
    }
    out
}
