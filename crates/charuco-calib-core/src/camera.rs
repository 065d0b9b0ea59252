//! Pinhole camera with Brown–Conrady distortion and the calibrated model.
//!
//! Distortion acts on normalized image coordinates `(x, y) = (X/Z, Y/Z)`:
//!
//! ```text
//! r² = x² + y²
//! x' = x (1 + k1 r² + k2 r⁴ + k3 r⁶) + 2 p1 x y + p2 (r² + 2 x²)
//! y' = y (1 + k1 r² + k2 r⁴ + k3 r⁶) + p1 (r² + 2 y²) + 2 p2 x y
//! ```
//!
//! Coefficients are stored in the conventional `[k1, k2, p1, p2, k3]` order.

use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Number of distortion coefficients in the model.
pub const DISTORTION_COEFFS: usize = 5;
/// Number of intrinsic parameters (`fx, fy, cx, cy` + distortion).
pub const INTRINSIC_PARAMS: usize = 4 + DISTORTION_COEFFS;

/// Validation failures for camera parameters.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraModelError {
    #[error("focal lengths must be positive and finite (fx={fx}, fy={fy})")]
    InvalidFocalLength { fx: f64, fy: f64 },
    #[error("{what} contains non-finite values")]
    NonFinite { what: &'static str },
    #[error("expected {DISTORTION_COEFFS} distortion coefficients, got {len}")]
    DistortionLength { len: usize },
    #[error("camera matrix must be upper triangular with K[2][2] = 1")]
    MalformedMatrix,
    #[error("{what} has {got} entries but the model has {expected} views")]
    ViewCountMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Linear intrinsics (zero skew).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self { fx, fy, cx, cy }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Parse a row-major 3×3 camera matrix.
    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Result<Self, CameraModelError> {
        let zero_ok = |v: f64| v.abs() < 1e-9;
        if !zero_ok(rows[1][0])
            || !zero_ok(rows[2][0])
            || !zero_ok(rows[2][1])
            || (rows[2][2] - 1.0).abs() > 1e-9
        {
            return Err(CameraModelError::MalformedMatrix);
        }
        let k = Self::new(rows[0][0], rows[1][1], rows[0][2], rows[1][2]);
        k.validate()?;
        Ok(k)
    }

    pub fn validate(&self) -> Result<(), CameraModelError> {
        if ![self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(CameraModelError::NonFinite {
                what: "camera matrix",
            });
        }
        if self.fx <= 0.0 || self.fy <= 0.0 {
            return Err(CameraModelError::InvalidFocalLength {
                fx: self.fx,
                fy: self.fy,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn normalized_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(self.fx * p.x + self.cx, self.fy * p.y + self.cy)
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }
}

/// Brown–Conrady radial + tangential distortion.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

/// Fixed-point iterations used when inverting the distortion.
const UNDISTORT_ITERS: usize = 20;

impl Distortion {
    pub fn coeffs(&self) -> [f64; DISTORTION_COEFFS] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_coeffs(c: &[f64]) -> Result<Self, CameraModelError> {
        if c.len() != DISTORTION_COEFFS {
            return Err(CameraModelError::DistortionLength { len: c.len() });
        }
        if !c.iter().all(|v| v.is_finite()) {
            return Err(CameraModelError::NonFinite {
                what: "distortion coefficients",
            });
        }
        Ok(Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        })
    }

    pub fn is_zero(&self) -> bool {
        self.coeffs().iter().all(|&v| v == 0.0)
    }

    /// Apply distortion to a normalized point.
    #[inline]
    pub fn distort(&self, p: Point2<f64>) -> Point2<f64> {
        let (x, y) = (p.x, p.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Point2::new(x * radial + dx, y * radial + dy)
    }

    /// Invert [`Distortion::distort`] by fixed-point iteration.
    pub fn undistort(&self, p: Point2<f64>) -> Point2<f64> {
        if self.is_zero() {
            return p;
        }
        let (x0, y0) = (p.x, p.y);
        let (mut x, mut y) = (x0, y0);
        for _ in 0..UNDISTORT_ITERS {
            let r2 = x * x + y * y;
            let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
            if radial <= 0.0 || !radial.is_finite() {
                return Point2::new(x0, y0);
            }
            let dx = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let nx = (x0 - dx) / radial;
            let ny = (y0 - dy) / radial;
            let step = (nx - x).abs() + (ny - y).abs();
            x = nx;
            y = ny;
            if step < 1e-14 {
                break;
            }
        }
        Point2::new(x, y)
    }
}

/// Intrinsics plus distortion: the projection function of one camera.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinholeCamera {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
}

impl PinholeCamera {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    /// Project a camera-frame point. `None` behind or on the image plane.
    #[inline]
    pub fn project(&self, p_cam: &Point3<f64>) -> Option<Point2<f64>> {
        if p_cam.z <= f64::EPSILON {
            return None;
        }
        let n = Point2::new(p_cam.x / p_cam.z, p_cam.y / p_cam.z);
        Some(
            self.intrinsics
                .normalized_to_pixel(self.distortion.distort(n)),
        )
    }

    /// Distorted pixel → ideal normalized coordinates.
    #[inline]
    pub fn unproject_normalized(&self, pixel: Point2<f64>) -> Point2<f64> {
        self.distortion
            .undistort(self.intrinsics.pixel_to_normalized(pixel))
    }

    /// Distorted pixel → undistorted pixel under the same intrinsics.
    pub fn undistort_pixel(&self, pixel: Point2<f64>) -> Point2<f64> {
        self.intrinsics
            .normalized_to_pixel(self.unproject_normalized(pixel))
    }
}

/// Board pose in camera coordinates as an axis-angle rotation and translation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewPose {
    pub rvec: [f64; 3],
    pub tvec: [f64; 3],
}

impl ViewPose {
    pub fn new(rvec: [f64; 3], tvec: [f64; 3]) -> Self {
        Self { rvec, tvec }
    }

    pub fn from_rotation(r: &Rotation3<f64>, t: Vector3<f64>) -> Self {
        let rv = r.scaled_axis();
        Self {
            rvec: [rv.x, rv.y, rv.z],
            tvec: [t.x, t.y, t.z],
        }
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(Vector3::from(self.rvec))
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::from(self.tvec)
    }

    /// Board frame → camera frame.
    #[inline]
    pub fn transform(&self, p: &Point3<f64>) -> Point3<f64> {
        self.rotation() * p + self.translation()
    }

    fn is_finite(&self) -> bool {
        self.rvec.iter().chain(self.tvec.iter()).all(|v| v.is_finite())
    }
}

/// Standard deviations of the estimated parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StdDeviations {
    /// `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    pub intrinsics: [f64; INTRINSIC_PARAMS],
    /// `[rx, ry, rz, tx, ty, tz]` per view.
    pub extrinsics: Vec<[f64; 6]>,
}

/// Result of a calibration run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    pub distortion: Distortion,
    /// One pose per calibration view, in sample order.
    pub views: Vec<ViewPose>,
    /// Root mean square reprojection error over all points, in pixels.
    pub rms_error: f64,
    /// RMS reprojection error of each view, in pixels.
    pub per_view_errors: Vec<f64>,
    pub std_deviations: Option<StdDeviations>,
    /// `[width, height]` of the calibration images when known.
    pub image_size: Option<[u32; 2]>,
}

impl CameraModel {
    /// Model with only intrinsics and distortion (for example one loaded
    /// from disk for undistortion).
    pub fn from_camera(camera: PinholeCamera) -> Self {
        Self {
            intrinsics: camera.intrinsics,
            distortion: camera.distortion,
            views: Vec::new(),
            rms_error: 0.0,
            per_view_errors: Vec::new(),
            std_deviations: None,
            image_size: None,
        }
    }

    pub fn camera(&self) -> PinholeCamera {
        PinholeCamera::new(self.intrinsics, self.distortion)
    }

    pub fn validate(&self) -> Result<(), CameraModelError> {
        self.intrinsics.validate()?;
        Distortion::from_coeffs(&self.distortion.coeffs())?;
        if !self.views.iter().all(ViewPose::is_finite) {
            return Err(CameraModelError::NonFinite { what: "view poses" });
        }
        if !self.rms_error.is_finite() || self.rms_error < 0.0 {
            return Err(CameraModelError::NonFinite { what: "rms error" });
        }
        if !self.per_view_errors.is_empty() && self.per_view_errors.len() != self.views.len() {
            return Err(CameraModelError::ViewCountMismatch {
                what: "per-view errors",
                expected: self.views.len(),
                got: self.per_view_errors.len(),
            });
        }
        if let Some(std) = &self.std_deviations {
            if std.extrinsics.len() != self.views.len() {
                return Err(CameraModelError::ViewCountMismatch {
                    what: "extrinsic std deviations",
                    expected: self.views.len(),
                    got: std.extrinsics.len(),
                });
            }
            let finite = std.intrinsics.iter().all(|v| v.is_finite())
                && std.extrinsics.iter().flatten().all(|v| v.is_finite());
            if !finite {
                return Err(CameraModelError::NonFinite {
                    what: "std deviations",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> PinholeCamera {
        PinholeCamera::new(
            CameraIntrinsics::new(800.0, 780.0, 320.0, 240.0),
            Distortion {
                k1: -0.2,
                k2: 0.05,
                p1: 0.001,
                p2: -0.0005,
                k3: 0.0,
            },
        )
    }

    #[test]
    fn undistort_inverts_distort() {
        let d = camera().distortion;
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(0.2, -0.1),
            Point2::new(-0.35, 0.3),
        ] {
            let back = d.undistort(d.distort(p));
            assert_relative_eq!(back.x, p.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, p.y, epsilon = 1e-9);
        }
    }

    #[test]
    fn projection_matches_manual_formula() {
        let cam = PinholeCamera::new(
            CameraIntrinsics::new(500.0, 500.0, 100.0, 50.0),
            Distortion::default(),
        );
        let p = cam.project(&Point3::new(0.1, -0.2, 2.0)).unwrap();
        assert_relative_eq!(p.x, 125.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-12);
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
    }

    #[test]
    fn pose_transform_uses_axis_angle() {
        let pose = ViewPose::new([0.0, 0.0, std::f64::consts::FRAC_PI_2], [1.0, 0.0, 5.0]);
        let q = pose.transform(&Point3::new(1.0, 0.0, 0.0));
        assert_relative_eq!(q.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(q.z, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn validation_rejects_bad_focal_length() {
        let mut model = CameraModel::from_camera(camera());
        assert!(model.validate().is_ok());
        model.intrinsics.fx = 0.0;
        assert!(matches!(
            model.validate(),
            Err(CameraModelError::InvalidFocalLength { .. })
        ));
        model.intrinsics.fx = f64::NAN;
        assert!(model.validate().is_err());
    }

    #[test]
    fn matrix_rows_round_trip_and_reject_garbage() {
        let k = camera().intrinsics;
        assert_eq!(CameraIntrinsics::from_rows(&k.to_rows()).unwrap(), k);
        let mut rows = k.to_rows();
        rows[2][2] = 0.0;
        assert_eq!(
            CameraIntrinsics::from_rows(&rows),
            Err(CameraModelError::MalformedMatrix)
        );
        assert_eq!(
            Distortion::from_coeffs(&[0.0; 4]),
            Err(CameraModelError::DistortionLength { len: 4 })
        );
    }
}
