//! Optimal new camera matrix and the valid-pixel region.

use crate::UndistortError;
use charuco_calib_core::{CameraIntrinsics, PinholeCamera};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Samples per image side used to trace the undistorted border.
const BORDER_SAMPLES: usize = 9;
/// Rounding slack when snapping the valid region to whole pixels.
const EDGE_EPS: f64 = 1e-6;

/// Pixel rectangle `[x, x + width) × [y, y + height)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Roi {
    pub fn full(size: [u32; 2]) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size[0],
            height: size[1],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Clone, Copy, Debug)]
struct Rect {
    x0: f64,
    y0: f64,
    x1: f64,
    y1: f64,
}

/// Inscribed and bounding rectangles of the undistorted image, in
/// normalized coordinates.
fn undistorted_rects(camera: &PinholeCamera, size: [u32; 2]) -> (Rect, Rect) {
    let (w, h) = ((size[0] as f64 - 1.0).max(0.0), (size[1] as f64 - 1.0).max(0.0));
    let n = BORDER_SAMPLES;
    let step = 1.0 / (n - 1) as f64;

    let mut inner = Rect {
        x0: f64::NEG_INFINITY,
        y0: f64::NEG_INFINITY,
        x1: f64::INFINITY,
        y1: f64::INFINITY,
    };
    let mut outer = Rect {
        x0: f64::INFINITY,
        y0: f64::INFINITY,
        x1: f64::NEG_INFINITY,
        y1: f64::NEG_INFINITY,
    };
    for i in 0..n {
        for j in 0..n {
            let px = Point2::new(j as f64 * step * w, i as f64 * step * h);
            let p = camera.unproject_normalized(px);
            outer.x0 = outer.x0.min(p.x);
            outer.y0 = outer.y0.min(p.y);
            outer.x1 = outer.x1.max(p.x);
            outer.y1 = outer.y1.max(p.y);
            if j == 0 {
                inner.x0 = inner.x0.max(p.x);
            }
            if j == n - 1 {
                inner.x1 = inner.x1.min(p.x);
            }
            if i == 0 {
                inner.y0 = inner.y0.max(p.y);
            }
            if i == n - 1 {
                inner.y1 = inner.y1.min(p.y);
            }
        }
    }
    (inner, outer)
}

/// New intrinsics for the undistorted image.
///
/// `alpha = 0` scales so only valid pixels are visible (the inscribed
/// rectangle fills the image); `alpha = 1` keeps every source pixel (the
/// bounding rectangle fills the image). Values in between blend linearly.
/// Also returns the region of valid pixels under the new intrinsics.
///
/// Without distortion the input intrinsics and the full image are returned
/// unchanged.
pub fn optimal_new_camera_matrix(
    camera: &PinholeCamera,
    size: [u32; 2],
    alpha: f64,
) -> Result<(CameraIntrinsics, Roi), UndistortError> {
    if size[0] < 2 || size[1] < 2 {
        return Err(UndistortError::InvalidImageSize(size));
    }
    if !(0.0..=1.0).contains(&alpha) {
        return Err(UndistortError::InvalidAlpha(alpha));
    }
    camera.intrinsics.validate()?;
    if camera.distortion.is_zero() {
        return Ok((camera.intrinsics, Roi::full(size)));
    }

    let (inner, outer) = undistorted_rects(camera, size);
    let finite = [inner.x0, inner.y0, inner.x1, inner.y1, outer.x0, outer.y0, outer.x1, outer.y1]
        .iter()
        .all(|v| v.is_finite());
    if !finite || inner.x1 <= inner.x0 || inner.y1 <= inner.y0 {
        return Err(UndistortError::DegenerateDistortion);
    }

    let (w, h) = (size[0] as f64 - 1.0, size[1] as f64 - 1.0);
    let fit = |r: &Rect| {
        let fx = w / (r.x1 - r.x0);
        let fy = h / (r.y1 - r.y0);
        (fx, fy, -fx * r.x0, -fy * r.y0)
    };
    let (fx0, fy0, cx0, cy0) = fit(&inner);
    let (fx1, fy1, cx1, cy1) = fit(&outer);
    let mix = |a: f64, b: f64| a * (1.0 - alpha) + b * alpha;
    let k = CameraIntrinsics::new(mix(fx0, fx1), mix(fy0, fy1), mix(cx0, cx1), mix(cy0, cy1));
    k.validate()?;

    // inscribed rectangle under the new intrinsics, clipped to the image
    let tl = k.normalized_to_pixel(Point2::new(inner.x0, inner.y0));
    let br = k.normalized_to_pixel(Point2::new(inner.x1, inner.y1));
    let left = (tl.x - EDGE_EPS).ceil().max(0.0);
    let top = (tl.y - EDGE_EPS).ceil().max(0.0);
    let right = (br.x + EDGE_EPS).floor().min(w);
    let bottom = (br.y + EDGE_EPS).floor().min(h);
    let roi = if right >= left && bottom >= top {
        Roi {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32 + 1,
            height: (bottom - top) as u32 + 1,
        }
    } else {
        Roi::default()
    };
    log::debug!("new camera matrix (alpha {alpha}): {k:?}, roi {roi:?}");
    Ok((k, roi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_calib_core::Distortion;

    fn barrel() -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::new(500.0, 500.0, 319.5, 239.5),
            Distortion {
                k1: -0.25,
                k2: 0.05,
                ..Distortion::default()
            },
        )
    }

    #[test]
    fn zero_distortion_is_identity() {
        let cam = PinholeCamera::new(CameraIntrinsics::new(400.0, 410.0, 300.0, 200.0), Distortion::default());
        let (k, roi) = optimal_new_camera_matrix(&cam, [640, 480], 0.3).unwrap();
        assert_eq!(k, cam.intrinsics);
        assert_eq!(roi, Roi::full([640, 480]));
    }

    #[test]
    fn alpha_zero_has_full_roi_and_longer_focal_length() {
        let cam = barrel();
        let (k0, roi0) = optimal_new_camera_matrix(&cam, [640, 480], 0.0).unwrap();
        let (k1, roi1) = optimal_new_camera_matrix(&cam, [640, 480], 1.0).unwrap();
        // barrel distortion: the inscribed view is a zoom-in
        assert!(k0.fx > k1.fx && k0.fy > k1.fy, "{k0:?} {k1:?}");
        assert!(roi0.width >= 639 && roi0.height >= 479, "{roi0:?}");
        assert!(roi1.width < roi0.width && roi1.height < roi0.height, "{roi1:?}");
        assert!(roi1.x > 0 && roi1.y > 0);
        // symmetric distortion keeps the principal point centred
        assert!((k1.cx - 319.5).abs() < 1.0 && (k1.cy - 239.5).abs() < 1.0);
    }

    #[test]
    fn rejects_bad_arguments() {
        let cam = barrel();
        assert!(matches!(
            optimal_new_camera_matrix(&cam, [640, 480], 1.5),
            Err(UndistortError::InvalidAlpha(_))
        ));
        assert!(matches!(
            optimal_new_camera_matrix(&cam, [1, 480], 0.0),
            Err(UndistortError::InvalidImageSize(_))
        ));
        let bad = PinholeCamera::new(CameraIntrinsics::new(-1.0, 500.0, 0.0, 0.0), Distortion::default());
        assert!(matches!(
            optimal_new_camera_matrix(&bad, [640, 480], 0.0),
            Err(UndistortError::Camera(_))
        ));
    }
}
