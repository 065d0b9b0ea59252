use crate::map::{remap, UndistortMap};
use crate::new_matrix::{optimal_new_camera_matrix, Roi};
use crate::UndistortError;
use charuco_calib_core::{CameraIntrinsics, CameraModel, PinholeCamera};
use image::{imageops, ImageBuffer, Pixel};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortParams {
    /// Free scaling in `[0, 1]`, see [`optimal_new_camera_matrix`].
    pub alpha: f64,
    /// Crop results to the valid-pixel region.
    pub crop_to_roi: bool,
}

impl Default for UndistortParams {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            crop_to_roi: true,
        }
    }
}

/// Precomputed undistortion for one camera and image size.
#[derive(Clone, Debug)]
pub struct Undistorter {
    camera: PinholeCamera,
    new_intrinsics: CameraIntrinsics,
    roi: Roi,
    map: UndistortMap,
    params: UndistortParams,
}

impl Undistorter {
    /// Validates the model before building the map. A model that records
    /// its calibration size only applies to images of that size.
    pub fn new(
        model: &CameraModel,
        image_size: [u32; 2],
        params: UndistortParams,
    ) -> Result<Self, UndistortError> {
        model.validate()?;
        if let Some(expected) = model.image_size.filter(|&s| s != image_size) {
            return Err(UndistortError::SizeMismatch {
                expected,
                got: image_size,
            });
        }
        let camera = model.camera();
        let (new_intrinsics, roi) = optimal_new_camera_matrix(&camera, image_size, params.alpha)?;
        if roi.is_empty() {
            log::warn!("undistorted image has an empty valid region");
        }
        let map = UndistortMap::new(&camera, &new_intrinsics, image_size);
        Ok(Self {
            camera,
            new_intrinsics,
            roi,
            map,
            params,
        })
    }

    pub fn camera(&self) -> &PinholeCamera {
        &self.camera
    }

    pub fn new_intrinsics(&self) -> &CameraIntrinsics {
        &self.new_intrinsics
    }

    pub fn roi(&self) -> Roi {
        self.roi
    }

    pub fn map(&self) -> &UndistortMap {
        &self.map
    }

    pub fn image_size(&self) -> [u32; 2] {
        [self.map.width, self.map.height]
    }

    /// Undistort an image of the size this undistorter was built for,
    /// cropping to the valid region when configured.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip_all))]
    pub fn undistort<P>(
        &self,
        image: &ImageBuffer<P, Vec<u8>>,
    ) -> Result<ImageBuffer<P, Vec<u8>>, UndistortError>
    where
        P: Pixel<Subpixel = u8> + 'static,
    {
        let got = [image.width(), image.height()];
        if got != self.image_size() {
            return Err(UndistortError::SizeMismatch {
                expected: self.image_size(),
                got,
            });
        }
        let full = remap(image, &self.map);
        if !self.params.crop_to_roi || self.roi == Roi::full(got) || self.roi.is_empty() {
            return Ok(full);
        }
        let r = self.roi;
        Ok(imageops::crop_imm(&full, r.x, r.y, r.width, r.height).to_image())
    }

    /// Distorted pixels → ideal pixels under the new intrinsics (before
    /// cropping).
    pub fn undistort_points(&self, points: &[Point2<f64>]) -> Vec<Point2<f64>> {
        undistort_points(&self.camera, points, &self.new_intrinsics)
    }
}

/// Distorted pixels of `camera` → ideal pixels under `target` intrinsics.
pub fn undistort_points(
    camera: &PinholeCamera,
    points: &[Point2<f64>],
    target: &CameraIntrinsics,
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|&p| target.normalized_to_pixel(camera.unproject_normalized(p)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use charuco_calib_core::{Distortion, PinholeCamera};
    use image::{GrayImage, Luma};
    use nalgebra::Point3;

    fn model(distortion: Distortion) -> CameraModel {
        CameraModel::from_camera(PinholeCamera::new(
            CameraIntrinsics::new(120.0, 120.0, 39.5, 29.5),
            distortion,
        ))
    }

    #[test]
    fn identity_camera_returns_input() {
        let u = Undistorter::new(&model(Distortion::default()), [80, 60], UndistortParams::default()).unwrap();
        assert!(u.map().is_identity());
        let img = GrayImage::from_fn(80, 60, |x, y| Luma([(x * 2 + y) as u8]));
        assert_eq!(u.undistort(&img).unwrap(), img);
    }

    #[test]
    fn crops_to_roi_and_checks_size() {
        let d = Distortion {
            k1: -0.3,
            k2: 0.08,
            ..Distortion::default()
        };
        let u = Undistorter::new(&model(d), [80, 60], UndistortParams::default()).unwrap();
        let img = GrayImage::from_pixel(80, 60, Luma([200]));
        let out = u.undistort(&img).unwrap();
        assert_eq!((out.width(), out.height()), (u.roi().width, u.roi().height));
        assert!(out.width() < 80);
        // the valid region only contains source pixels
        let centre = out.get_pixel(out.width() / 2, out.height() / 2).0[0];
        assert_eq!(centre, 200);

        let wrong = GrayImage::new(40, 30);
        assert!(matches!(u.undistort(&wrong), Err(UndistortError::SizeMismatch { .. })));
    }

    #[test]
    fn undistorted_points_follow_a_pinhole_projection() {
        let d = Distortion {
            k1: -0.2,
            p1: 0.001,
            ..Distortion::default()
        };
        let m = model(d);
        let u = Undistorter::new(&m, [80, 60], UndistortParams { alpha: 0.5, crop_to_roi: true }).unwrap();
        let cam = m.camera();
        let p3 = Point3::new(0.1, -0.08, 1.0);
        let distorted = cam.project(&p3).unwrap();
        let ideal = u.undistort_points(&[distorted])[0];
        let expected = u.new_intrinsics().normalized_to_pixel(Point2::new(0.1, -0.08));
        assert_relative_eq!(ideal, expected, epsilon = 1e-6);
    }

    #[test]
    fn calibration_size_must_match() {
        let mut m = model(Distortion {
            k1: -0.1,
            ..Distortion::default()
        });
        m.image_size = Some([80, 60]);
        assert!(Undistorter::new(&m, [80, 60], UndistortParams::default()).is_ok());
        assert_eq!(
            Undistorter::new(&m, [160, 120], UndistortParams::default()).unwrap_err(),
            UndistortError::SizeMismatch {
                expected: [80, 60],
                got: [160, 120]
            }
        );
    }

    /// Intensity-weighted centroid of dark pixels within `radius` of `near`.
    fn dark_centroid(img: &GrayImage, near: Point2<f64>, radius: f64) -> Point2<f64> {
        let (mut sx, mut sy, mut mass) = (0.0, 0.0, 0.0);
        for (x, y, p) in img.enumerate_pixels() {
            let q = Point2::new(x as f64, y as f64);
            if (q - near).norm() > radius {
                continue;
            }
            let w = 255.0 - p.0[0] as f64;
            sx += w * q.x;
            sy += w * q.y;
            mass += w;
        }
        assert!(mass > 0.0, "no dark pixels near {near:?}");
        Point2::new(sx / mass, sy / mass)
    }

    #[test]
    fn dark_spot_lands_at_its_pinhole_projection() {
        let m = CameraModel::from_camera(PinholeCamera::new(
            CameraIntrinsics::new(200.0, 200.0, 159.5, 119.5),
            Distortion {
                k1: -0.25,
                k2: 0.05,
                ..Distortion::default()
            },
        ));
        let cam = m.camera();
        // a dark disc around the ray (0.5, 0.35) as the lens images it
        let ray = Point2::new(0.5, 0.35);
        let img = GrayImage::from_fn(320, 240, |x, y| {
            let n = cam.unproject_normalized(Point2::new(x as f64, y as f64));
            Luma([if (n - ray).norm() < 0.025 { 0 } else { 255 }])
        });
        let distorted = cam.intrinsics.normalized_to_pixel(cam.distortion.distort(ray));
        let pinhole = cam.intrinsics.normalized_to_pixel(ray);
        assert!((dark_centroid(&img, distorted, 12.0) - distorted).norm() < 0.75);
        assert!((distorted - pinhole).norm() > 5.0, "{distorted:?} vs {pinhole:?}");

        let u = Undistorter::new(
            &m,
            [320, 240],
            UndistortParams {
                alpha: 0.0,
                crop_to_roi: false,
            },
        )
        .unwrap();
        let out = u.undistort(&img).unwrap();
        let expected = u.new_intrinsics().normalized_to_pixel(ray);
        let centroid = dark_centroid(&out, expected, 15.0);
        assert!((centroid - expected).norm() < 0.75, "{centroid:?} vs {expected:?}");
    }

    #[test]
    fn invalid_model_is_rejected_up_front() {
        let mut m = model(Distortion::default());
        m.intrinsics.fy = 0.0;
        assert!(matches!(
            Undistorter::new(&m, [80, 60], UndistortParams::default()),
            Err(UndistortError::Camera(_))
        ));
    }
}
