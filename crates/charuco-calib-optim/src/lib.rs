//! Planar-target camera calibration.
//!
//! [`calibrate`] runs the classic pipeline on per-view corner
//! correspondences:
//!
//! 1. a normalized-DLT homography per view,
//! 2. closed-form intrinsics ([`centered_intrinsics`] or [`zhang_intrinsics`]),
//! 3. per-view poses from the homographies ([`pose_from_homography`]),
//! 4. joint Levenberg–Marquardt refinement of intrinsics, Brown–Conrady
//!    distortion and all poses,
//! 5. reprojection statistics and parameter standard deviations.

mod calibrator;
mod error;
mod init;
mod planar_pose;
mod problem;

pub use calibrator::{calibrate, CalibrationOptions, InitMethod};
pub use error::CalibrationError;
pub use init::{centered_intrinsics, zhang_intrinsics};
pub use planar_pose::pose_from_homography;
