//! Lens undistortion.
//!
//! [`Undistorter`] validates a calibrated [`CameraModel`](charuco_calib_core::CameraModel),
//! derives new intrinsics with [`optimal_new_camera_matrix`], precomputes an
//! [`UndistortMap`] and [`remap`]s `image` buffers through it, cropping to
//! the valid region.

mod map;
mod new_matrix;
mod undistorter;

use charuco_calib_core::CameraModelError;

pub use map::{remap, UndistortMap};
pub use new_matrix::{optimal_new_camera_matrix, Roi};
pub use undistorter::{undistort_points, UndistortParams, Undistorter};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UndistortError {
    #[error(transparent)]
    Camera(#[from] CameraModelError),
    #[error("image size {0:?} is too small to undistort")]
    InvalidImageSize([u32; 2]),
    #[error("alpha must be in [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("distortion folds the image border; no valid region")]
    DegenerateDistortion,
    #[error("image is {got:?}, undistorter was built for {expected:?}")]
    SizeMismatch { expected: [u32; 2], got: [u32; 2] },
}
