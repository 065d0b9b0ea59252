//! Core types for ChArUco camera calibration.
//!
//! This crate is purely geometric and has no detector logic:
//! - gray image views and bilinear sampling,
//! - homography estimation (normalized DLT and the 4-point solver),
//! - the pinhole camera with Brown–Conrady distortion and the calibrated
//!   [`CameraModel`],
//! - calibration observations ([`CalibrationSample`]) and the
//!   [`PlanarTarget`] seam used by the solver,
//! - a small stderr logger.

mod camera;
mod homography;
mod image;
mod logger;
mod target;

pub use camera::{
    CameraIntrinsics, CameraModel, CameraModelError, Distortion, PinholeCamera, StdDeviations,
    ViewPose, DISTORTION_COEFFS, INTRINSIC_PARAMS,
};
pub use homography::{
    estimate_homography, homography_from_4pt, homography_from_4pt_f32, Homography,
};
pub use image::{sample_bilinear, sample_bilinear_f64, sample_bilinear_u8, GrayImage, GrayImageView};
pub use target::{CalibrationSample, CornerCorrespondence, PlanarTarget, SampleError};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_verbosity};
