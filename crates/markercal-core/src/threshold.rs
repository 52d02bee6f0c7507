//! Intensity statistics used to binarize patches.

/// Otsu threshold of a set of intensities. Samples `< t` are dark.
pub fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let (min_v, max_v) = samples
        .iter()
        .fold((255u8, 0u8), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16).div_ceil(2)) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }
        sum_b += t as f64 * h as f64;
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;
        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            // Class "dark" is <= t, so the strict threshold sits one above.
            best_t = (t + 1).min(255) as u8;
        }
    }

    best_t
}

/// Population standard deviation of a set of intensities.
pub fn std_dev(samples: &[u8]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = samples
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n;
    var.sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otsu_separates_two_clusters() {
        let mut samples = vec![20u8; 50];
        samples.extend(std::iter::repeat_n(30u8, 10));
        samples.extend(std::iter::repeat_n(200u8, 40));
        samples.extend(std::iter::repeat_n(220u8, 10));
        let t = otsu_threshold_from_samples(&samples);
        assert!(t > 30 && t <= 200, "threshold {t}");
    }

    #[test]
    fn otsu_degenerate_inputs() {
        assert_eq!(otsu_threshold_from_samples(&[]), 127);
        assert_eq!(otsu_threshold_from_samples(&[9, 9, 9]), 9);
        let t = otsu_threshold_from_samples(&[0, 0, 255, 255]);
        assert!(t > 0 && t <= 255);
    }

    #[test]
    fn std_dev_of_constant_is_zero() {
        assert_eq!(std_dev(&[7; 16]), 0.0);
        assert!((std_dev(&[0, 10]) - 5.0).abs() < 1e-6);
    }
}
