//! Global (Otsu) and local (adaptive mean) thresholding.

use charuco_calib_core::GrayImageView;

/// Compute Otsu threshold from a set of sample intensities.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let mut min_v = 255u8;
    let mut max_v = 0u8;
    for &v in samples {
        min_v = min_v.min(v);
        max_v = max_v.max(v);
    }
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    let nonzero_bins = hist.iter().filter(|&&h| h > 0).count();
    if nonzero_bins <= 2 {
        return ((min_v as u16 + max_v as u16).div_ceil(2)) as u8;
    }

    let total: f64 = samples.len() as f64;
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

        sum_b += (t as f64) * (h as f64);
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            // samples strictly below the returned value are "dark"
            best_t = (t + 1).min(255) as u8;
        }
    }

    best_t
}

/// Summed-area table with one row/column of zero padding.
pub(crate) struct IntegralImage {
    width: usize,
    height: usize,
    sums: Vec<u64>,
}

impl IntegralImage {
    pub(crate) fn new(img: &GrayImageView<'_>) -> Self {
        let (w, h) = (img.width, img.height);
        let stride = w + 1;
        let mut sums = vec![0u64; stride * (h + 1)];
        for y in 0..h {
            let mut row = 0u64;
            for x in 0..w {
                row += img.data[y * w + x] as u64;
                let idx = (y + 1) * stride + x + 1;
                sums[idx] = sums[idx - stride] + row;
            }
        }
        Self {
            width: w,
            height: h,
            sums,
        }
    }

    /// Mean over the window of the given radius, clipped to the image.
    #[inline]
    pub(crate) fn local_mean(&self, x: usize, y: usize, radius: usize) -> f32 {
        let stride = self.width + 1;
        let x0 = x.saturating_sub(radius);
        let y0 = y.saturating_sub(radius);
        let x1 = (x + radius + 1).min(self.width);
        let y1 = (y + radius + 1).min(self.height);
        let sum = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        let area = ((x1 - x0) * (y1 - y0)).max(1) as f32;
        sum as f32 / area
    }
}

/// Inverted adaptive mean threshold.
///
/// A pixel is foreground (`true`) when it is darker than the mean of its
/// `window × window` neighbourhood by more than `c`. Uniform regions, dark
/// or bright, are background, so only the rims of dark shapes survive.
pub(crate) fn adaptive_threshold_inv(
    img: &GrayImageView<'_>,
    integral: &IntegralImage,
    window: usize,
    c: f32,
) -> Vec<bool> {
    let radius = (window.max(3) | 1) / 2;
    let mut mask = vec![false; img.width * img.height];
    for y in 0..img.height {
        for x in 0..img.width {
            let v = img.data[y * img.width + x] as f32;
            mask[y * img.width + x] = v <= integral.local_mean(x, y, radius) - c;
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_calib_core::GrayImage;

    #[test]
    fn otsu_separates_two_levels() {
        let mut samples = vec![20u8; 50];
        samples.extend(std::iter::repeat(200u8).take(50));
        samples.push(90);
        let t = otsu_threshold_from_samples(&samples);
        assert!(t > 20 && t <= 200, "threshold {t}");
    }

    #[test]
    fn adaptive_threshold_marks_dark_rim_only() {
        // 20x20 white with a 10x10 black square in the middle
        let mut img = GrayImage::filled(20, 20, 255);
        for y in 5..15 {
            for x in 5..15 {
                img.set(x, y, 0);
            }
        }
        let view = img.view();
        let integral = IntegralImage::new(&view);
        let mask = adaptive_threshold_inv(&view, &integral, 5, 7.0);
        // rim pixel of the square is foreground
        assert!(mask[5 * 20 + 5]);
        // centre of the square is uniform → background
        assert!(!mask[10 * 20 + 10]);
        // white surroundings stay background
        assert!(!mask[2 * 20 + 2]);
    }
}
