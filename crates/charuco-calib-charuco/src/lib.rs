//! ChArUco board model and per-image correspondence building.
//!
//! - [`CharucoBoard`]: validated board geometry and id mappings; implements
//!   [`charuco_calib_core::PlanarTarget`].
//! - [`BoardConfig`]: the key/value board configuration table.
//! - [`CorrespondenceBuilder`]: detected markers → refined corner
//!   correspondences.
//! - [`DecimationFilter`]: which frames of a sequence feed calibration.

mod board;
mod config;
mod decimation;
mod interpolate;

pub use board::{CharucoBoard, CharucoBoardError, CharucoBoardSpec};
pub use config::{BoardConfig, BoardConfigError};
pub use decimation::{DecimationFilter, DecimationParams, FrameVerdict};
pub use interpolate::{CorrespondenceBuilder, CorrespondenceParams};
