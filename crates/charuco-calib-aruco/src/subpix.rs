//! Sub-pixel corner refinement.
//!
//! For a true corner `q`, the image gradient at every nearby point `p` is
//! orthogonal to `p - q` (either the gradient vanishes or `p` lies on an edge
//! through `q`). Stacking `g gᵀ (p - q) = 0` over a Gaussian-weighted window
//! gives a 2×2 linear system for `q`, solved iteratively until the update
//! drops below `epsilon`.

use charuco_calib_core::{sample_bilinear_f64, GrayImageView};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

/// Window and stopping criteria for [`refine_corner_subpix`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixParams {
    /// Half window size in pixels; the window is `(2w+1)²`.
    pub half_window: usize,
    pub max_iters: usize,
    /// Stop once an update moves the corner by less than this (pixels).
    pub epsilon: f64,
}

impl Default for SubPixParams {
    fn default() -> Self {
        Self {
            half_window: 3,
            max_iters: 100,
            epsilon: 1e-5,
        }
    }
}

/// Refine one corner estimate.
///
/// Returns the input unchanged when the window holds no usable gradient or
/// the refined point leaves the window or the image.
pub fn refine_corner_subpix(
    img: &GrayImageView<'_>,
    initial: Point2<f64>,
    params: &SubPixParams,
) -> Point2<f64> {
    let w = params.half_window.max(1) as i32;
    let inv_w2 = 1.0 / (w * w) as f64;
    let eps2 = params.epsilon * params.epsilon;

    let mut q = initial;
    for _ in 0..params.max_iters.max(1) {
        let (mut a, mut b, mut c) = (0.0f64, 0.0f64, 0.0f64);
        let (mut bb1, mut bb2) = (0.0f64, 0.0f64);

        for dy in -w..=w {
            for dx in -w..=w {
                let (fx, fy) = (dx as f64, dy as f64);
                let m = (-(fx * fx + fy * fy) * inv_w2).exp();
                let px = q.x + fx;
                let py = q.y + fy;
                let gx = sample_bilinear_f64(img, px + 1.0, py) - sample_bilinear_f64(img, px - 1.0, py);
                let gy = sample_bilinear_f64(img, px, py + 1.0) - sample_bilinear_f64(img, px, py - 1.0);

                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;
                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * fx + gxy * fy;
                bb2 += gxy * fx + gyy * fy;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON * a.max(c).max(1.0) {
            break;
        }
        let inv = 1.0 / det;
        let next = Point2::new(
            q.x + c * inv * bb1 - b * inv * bb2,
            q.y - b * inv * bb1 + a * inv * bb2,
        );
        let step2 = (next - q).norm_squared();
        q = next;
        if !img.contains(q.x, q.y) || step2 <= eps2 {
            break;
        }
    }

    let shift: Vector2<f64> = q - initial;
    let limit = w as f64;
    if !q.x.is_finite()
        || !q.y.is_finite()
        || shift.x.abs() > limit
        || shift.y.abs() > limit
        || !img.contains(q.x, q.y)
    {
        return initial;
    }
    q
}

/// Refine a batch of `f32` corners in place.
pub fn refine_corners_subpix(img: &GrayImageView<'_>, corners: &mut [Point2<f32>], params: &SubPixParams) {
    for p in corners.iter_mut() {
        let r = refine_corner_subpix(img, Point2::new(p.x as f64, p.y as f64), params);
        *p = Point2::new(r.x as f32, r.y as f32);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_calib_core::GrayImage;

    /// Anti-aliased black quadrant below-right of `(cx, cy)`, 4x supersampled.
    fn quadrant_image(size: usize, cx: f64, cy: f64) -> GrayImage {
        let mut img = GrayImage::filled(size, size, 255);
        for y in 0..size {
            for x in 0..size {
                let mut dark = 0;
                for sy in 0..4 {
                    for sx in 0..4 {
                        let px = x as f64 + (sx as f64 + 0.5) / 4.0 - 0.5;
                        let py = y as f64 + (sy as f64 + 0.5) / 4.0 - 0.5;
                        if px >= cx && py >= cy {
                            dark += 1;
                        }
                    }
                }
                img.set(x, y, (255 - dark * 255 / 16) as u8);
            }
        }
        img
    }

    /// Saddle (chessboard) corner at `(cx, cy)`.
    fn saddle_image(size: usize, cx: f64, cy: f64) -> GrayImage {
        let mut img = GrayImage::filled(size, size, 255);
        for y in 0..size {
            for x in 0..size {
                let mut dark = 0;
                for sy in 0..4 {
                    for sx in 0..4 {
                        let px = x as f64 + (sx as f64 + 0.5) / 4.0 - 0.5;
                        let py = y as f64 + (sy as f64 + 0.5) / 4.0 - 0.5;
                        if (px >= cx) == (py >= cy) {
                            dark += 1;
                        }
                    }
                }
                img.set(x, y, (255 - dark * 255 / 16) as u8);
            }
        }
        img
    }

    #[test]
    fn converges_to_saddle_point() {
        let img = saddle_image(40, 20.3, 19.6);
        let params = SubPixParams {
            half_window: 5,
            ..SubPixParams::default()
        };
        let q = refine_corner_subpix(&img.view(), Point2::new(21.0, 19.0), &params);
        assert!((q.x - 20.3).abs() < 0.1, "x = {}", q.x);
        assert!((q.y - 19.6).abs() < 0.1, "y = {}", q.y);
    }

    #[test]
    fn converges_to_l_corner() {
        let img = quadrant_image(40, 18.4, 21.2);
        let q = refine_corner_subpix(&img.view(), Point2::new(19.0, 20.5), &SubPixParams::default());
        assert!((q.x - 18.4).abs() < 0.15, "x = {}", q.x);
        assert!((q.y - 21.2).abs() < 0.15, "y = {}", q.y);
    }

    #[test]
    fn refinement_is_idempotent() {
        let img = saddle_image(40, 20.3, 19.6);
        let params = SubPixParams {
            half_window: 5,
            max_iters: 100,
            epsilon: 1e-3,
        };
        let q1 = refine_corner_subpix(&img.view(), Point2::new(21.0, 19.0), &params);
        let q2 = refine_corner_subpix(&img.view(), q1, &params);
        assert!((q2 - q1).norm() < params.epsilon, "moved {}", (q2 - q1).norm());
    }

    #[test]
    fn flat_region_keeps_input() {
        let img = GrayImage::filled(20, 20, 128);
        let p = Point2::new(10.2, 9.7);
        assert_eq!(refine_corner_subpix(&img.view(), p, &SubPixParams::default()), p);
    }
}
