use charuco_calib_core::ViewPose;
use nalgebra::{Matrix3, Rotation3, Vector3};

/// Decompose a plane-induced homography `H ~ K [r1 r2 t]` into the board
/// pose. The translation sign is chosen so the board lies in front of the
/// camera.
pub fn pose_from_homography(k: &Matrix3<f64>, h: &Matrix3<f64>) -> Option<ViewPose> {
    let k_inv = k.try_inverse()?;
    let a1: Vector3<f64> = k_inv * h.column(0);
    let a2: Vector3<f64> = k_inv * h.column(1);
    let a3: Vector3<f64> = k_inv * h.column(2);

    let norm = 0.5 * (a1.norm() + a2.norm());
    if norm <= f64::EPSILON || !norm.is_finite() {
        return None;
    }
    let mut lambda = 1.0 / norm;
    if a3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = a1 * lambda;
    let r2 = a2 * lambda;
    let r3 = r1.cross(&r2);
    let r = Matrix3::from_columns(&[r1, r2, r3]);

    // nearest rotation in the Frobenius sense
    let svd = r.svd(true, true);
    let (u, v_t) = (svd.u?, svd.v_t?);
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r_orth = u * v_t;
    }

    let t = a3 * lambda;
    let pose = ViewPose::from_rotation(&Rotation3::from_matrix_unchecked(r_orth), t);
    pose.rvec
        .iter()
        .chain(pose.tvec.iter())
        .all(|v| v.is_finite())
        .then_some(pose)
}
