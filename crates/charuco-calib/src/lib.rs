//! ChArUco camera calibration.
//!
//! This facade re-exports the workspace crates and adds the batch pieces:
//! - [`pipeline`]: images → markers → ChArUco corners → decimation →
//!   calibrated [`CameraModel`](core::CameraModel),
//! - [`io`]: result files (`camera_param.json` / `camera_param.bin`) and
//!   undistorted image output,
//! - [`detection`]: annotated marker detection previews,
//! - [`synthetic`]: rendered views of a board through a known camera.
//!
//! ## Quickstart
//!
//! ```no_run
//! use charuco_calib::charuco::BoardConfig;
//! use charuco_calib::io::{save_result, ResultFormat};
//! use charuco_calib::pipeline::{list_images, CalibrationPipeline, PipelineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let board = BoardConfig::load("board/sample_board.csv")?.build_board()?;
//! let pipeline = CalibrationPipeline::new(board, PipelineConfig::default())?;
//! let run = pipeline.run(&list_images("images", "png")?)?;
//! println!("rms {:.3} px", run.model.rms_error);
//! save_result(&run.model, "result", ResultFormat::Json)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `charuco_calib::core`: images, homographies, camera model, samples.
//! - `charuco_calib::aruco`: dictionaries and the marker detector.
//! - `charuco_calib::charuco`: board model, configuration table, corner
//!   interpolation, decimation.
//! - `charuco_calib::optim`: the calibrator.
//! - `charuco_calib::undistort`: new camera matrix and remapping.
//! - `charuco_calib::print`: printable board images.

pub use charuco_calib_aruco as aruco;
pub use charuco_calib_charuco as charuco;
pub use charuco_calib_core as core;
pub use charuco_calib_optim as optim;
pub use charuco_calib_print as print;
pub use charuco_calib_undistort as undistort;

pub use charuco_calib_charuco::{BoardConfig, CharucoBoard};
pub use charuco_calib_core::CameraModel;

pub mod detection;
pub mod io;
pub mod pipeline;
pub mod synthetic;
