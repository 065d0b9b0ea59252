//! Closed-form intrinsics from plane homographies.

use charuco_calib_core::CameraIntrinsics;
use nalgebra::{DMatrix, DVector, Matrix3, SVector, Vector3};

/// Principal point at the image centre, focal lengths from the
/// orthogonality of the board axes and of their diagonals.
///
/// With `ω = diag(1/fx², 1/fy², 1)` in centred coordinates every view adds
/// `h1ᵀ ω h2 = 0` and `d1ᵀ ω d2 = 0` with `d1,2 = (h1 ± h2) / 2`; the two
/// unknowns are solved by linear least squares.
pub fn centered_intrinsics(homographies: &[Matrix3<f64>], image_size: [u32; 2]) -> Option<CameraIntrinsics> {
    if homographies.is_empty() {
        return None;
    }
    let cx = (image_size[0] as f64 - 1.0) * 0.5;
    let cy = (image_size[1] as f64 - 1.0) * 0.5;

    let n = homographies.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 2);
    let mut b = DVector::<f64>::zeros(2 * n);
    for (i, h) in homographies.iter().enumerate() {
        let mut hc = *h;
        for c in 0..3 {
            hc[(0, c)] -= cx * h[(2, c)];
            hc[(1, c)] -= cy * h[(2, c)];
        }
        let h1: Vector3<f64> = hc.column(0).into_owned();
        let h2: Vector3<f64> = hc.column(1).into_owned();
        let d1 = (h1 + h2) * 0.5;
        let d2 = (h1 - h2) * 0.5;
        let (h1, h2, d1, d2) = (
            h1.try_normalize(f64::EPSILON)?,
            h2.try_normalize(f64::EPSILON)?,
            d1.try_normalize(f64::EPSILON)?,
            d2.try_normalize(f64::EPSILON)?,
        );

        a[(2 * i, 0)] = h1.x * h2.x;
        a[(2 * i, 1)] = h1.y * h2.y;
        b[2 * i] = -h1.z * h2.z;
        a[(2 * i + 1, 0)] = d1.x * d2.x;
        a[(2 * i + 1, 1)] = d1.y * d2.y;
        b[2 * i + 1] = -d1.z * d2.z;
    }

    let f = a.svd(true, true).solve(&b, 1e-12).ok()?;
    if !(f[0].is_finite() && f[1].is_finite()) || f[0] == 0.0 || f[1] == 0.0 {
        return None;
    }
    let fx = (1.0 / f[0]).abs().sqrt();
    let fy = (1.0 / f[1]).abs().sqrt();
    let k = CameraIntrinsics::new(fx, fy, cx, cy);
    k.validate().ok()?;
    Some(k)
}

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed form for all four linear intrinsics (needs ≥ 3 views).
///
/// Skew is estimated but discarded. `None` when the views do not constrain
/// the image of the absolute conic.
pub fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Option<CameraIntrinsics> {
    if homographies.len() < 3 {
        return None;
    }
    let m = homographies.len();
    let mut v = DMatrix::<f64>::zeros(2 * m, 6);
    for (k, h) in homographies.iter().enumerate() {
        // scale-free rows: normalize H so the conditioning does not depend on units
        let h = h / h.norm();
        let v11 = v_ij(&h, 0, 0);
        let v22 = v_ij(&h, 1, 1);
        let v12 = v_ij(&h, 0, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let svd = v.svd(false, true);
    let v_t = svd.v_t?;
    let b = v_t.row(v_t.nrows() - 1);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    let scale = b11 * b11 + b22 * b22;
    if scale <= 0.0 || denom.abs() / scale < 1e-6 {
        return None;
    }
    let cy = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + cy * (b12 * b13 - b11 * b23)) / b11;
    if lambda.signum() != b11.signum() {
        return None;
    }
    let fx = (lambda / b11).sqrt();
    let fy = (lambda * b11 / denom).sqrt();
    let skew = -b12 * fx * fx * fy / lambda;
    let cx = skew * cy / fy - b13 * fx * fx / lambda;

    let k = CameraIntrinsics::new(fx, fy, cx, cy);
    k.validate().ok()?;
    Some(k)
}
