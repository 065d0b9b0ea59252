//! Synthetic camera views of a board, for tests and demos.

use crate::charuco::CharucoBoard;
use crate::core::{PinholeCamera, ViewPose};
use crate::print::board_intensity;
use image::{GrayImage, Luma};
use nalgebra::{Point2, Point3, Rotation3, Vector3};

/// Grey level seen where the viewing ray misses the board plane.
const BACKGROUND: u8 = 128;

/// Render the board through a distorted pinhole camera.
///
/// Each output pixel averages `supersample²` rays. A ray is undistorted,
/// intersected with the board plane `Z = 0` and shaded with the ideal board
/// pattern (white paper around the grid).
pub fn render_view(
    board: &CharucoBoard,
    camera: &PinholeCamera,
    pose: &ViewPose,
    size: [u32; 2],
    supersample: u32,
) -> GrayImage {
    let ss = supersample.max(1);
    let r_inv = pose.rotation().inverse();
    let origin = Point3::from(-(r_inv * pose.translation()));

    let shade = |px: f64, py: f64| -> f64 {
        let n = camera.unproject_normalized(Point2::new(px, py));
        let dir: Vector3<f64> = r_inv * Vector3::new(n.x, n.y, 1.0);
        if dir.z.abs() < 1e-12 {
            return BACKGROUND as f64;
        }
        let s = -origin.z / dir.z;
        if s <= 0.0 {
            return BACKGROUND as f64;
        }
        let hit = origin + dir * s;
        board_intensity(board, Point2::new(hit.x, hit.y)) as f64
    };

    GrayImage::from_fn(size[0], size[1], |x, y| {
        let mut acc = 0.0;
        for sy in 0..ss {
            for sx in 0..ss {
                let ox = (sx as f64 + 0.5) / ss as f64 - 0.5;
                let oy = (sy as f64 + 0.5) / ss as f64 - 0.5;
                acc += shade(x as f64 + ox, y as f64 + oy);
            }
        }
        Luma([(acc / (ss * ss) as f64).round().clamp(0.0, 255.0) as u8])
    })
}

/// `count` poses looking at the board centre from `distance`, tilted up to
/// `max_tilt` radians in a ring around the optical axis.
pub fn orbit_poses(board: &CharucoBoard, count: usize, distance: f64, max_tilt: f64) -> Vec<ViewPose> {
    let [w, h] = board.extent();
    let centre = Vector3::new(0.5 * w, 0.5 * h, 0.0);
    (0..count)
        .map(|i| {
            let a = i as f64 / count.max(1) as f64 * std::f64::consts::TAU;
            let r = Rotation3::from_euler_angles(max_tilt * a.cos(), max_tilt * a.sin(), 0.15 * a.sin());
            let t = Vector3::new(0.0, 0.0, distance * (1.0 + 0.1 * (2.0 * a).cos())) - r * centre;
            ViewPose::from_rotation(&r, t)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aruco::builtins::builtin_dictionary;
    use crate::charuco::CharucoBoardSpec;
    use crate::core::{CameraIntrinsics, Distortion};
    use std::sync::Arc;

    #[test]
    fn frontal_view_shows_board_pattern() {
        let board = CharucoBoard::new(
            CharucoBoardSpec {
                squares_x: 4,
                squares_y: 3,
                square_length: 10.0,
                marker_length: 7.0,
            },
            Arc::new(builtin_dictionary("4X4_50").unwrap()),
        )
        .unwrap();
        let cam = PinholeCamera::new(CameraIntrinsics::new(100.0, 100.0, 49.5, 39.5), Distortion::default());
        // board origin at pixel (9.5, 14.5), 10 px per square
        let pose = ViewPose::new([0.0; 3], [-40.0, -25.0, 100.0]);
        let img = render_view(&board, &cam, &pose, [100, 80], 2);

        // centre of the top-left (black) square
        assert_eq!(img.get_pixel(14, 19).0[0], 0);
        // paper outside the grid
        assert_eq!(img.get_pixel(2, 2).0[0], 255);
        // corner of the white square next to it (marker margin)
        assert_eq!(img.get_pixel(20, 15).0[0], 255);

        let behind = ViewPose::new([0.0; 3], [0.0, 0.0, -100.0]);
        let img = render_view(&board, &cam, &behind, [10, 10], 1);
        assert_eq!(img.get_pixel(5, 5).0[0], BACKGROUND);
    }
}
