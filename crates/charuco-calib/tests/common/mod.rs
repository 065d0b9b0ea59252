#![allow(dead_code)]

use charuco_calib::charuco::{BoardConfig, CharucoBoard};
use charuco_calib::core::{CameraIntrinsics, Distortion, PinholeCamera, ViewPose};
use charuco_calib::synthetic::{orbit_poses, render_view};
use std::path::{Path, PathBuf};

pub const SIZE: [u32; 2] = [640, 480];

pub const BOARD_TABLE: &str = ",value
dict_ID,0
square_length,30
marker_length,22
margin_tb,10
margin_lr,10
num_squares_x,7
num_squares_y,5
board_size_x,297
board_size_y,210
";

pub fn board_config() -> BoardConfig {
    BoardConfig::from_table_str(BOARD_TABLE).unwrap()
}

pub fn board() -> CharucoBoard {
    board_config().build_board().unwrap()
}

pub fn camera() -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(600.0, 605.0, 322.0, 236.0),
        Distortion {
            k1: -0.12,
            k2: 0.03,
            ..Distortion::default()
        },
    )
}

pub fn poses(count: usize) -> Vec<ViewPose> {
    orbit_poses(&board(), count, 330.0, 0.35)
}

pub fn views(count: usize) -> Vec<image::GrayImage> {
    let board = board();
    let cam = camera();
    poses(count)
        .iter()
        .map(|pose| render_view(&board, &cam, pose, SIZE, 2))
        .collect()
}

/// Write `views` as `view_00.png`, `view_01.png`, ... into `dir`.
pub fn write_views(dir: &Path, views: &[image::GrayImage]) -> Vec<PathBuf> {
    views
        .iter()
        .enumerate()
        .map(|(i, img)| {
            let path = dir.join(format!("view_{i:02}.png"));
            img.save(&path).unwrap();
            path
        })
        .collect()
}
