//! Joint reprojection problem over intrinsics, distortion and view poses.
//!
//! Full parameter layout: `[fx, fy, cx, cy, k1, k2, p1, p2, k3]` followed by
//! `[rx, ry, rz, tx, ty, tz]` per view. Only the free subset is exposed to
//! the solver; fixed entries keep their value in the full vector.

use charuco_calib_core::{
    CameraIntrinsics, Distortion, PinholeCamera, ViewPose, INTRINSIC_PARAMS,
};
use levenberg_marquardt::LeastSquaresProblem;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Point2, Point3, Rotation3, Vector3};

pub(crate) const POSE_PARAMS: usize = 6;

/// Object/image pairs of one view.
#[derive(Clone, Debug)]
pub(crate) struct ViewData {
    pub object: Vec<Point3<f64>>,
    pub image: Vec<Point2<f64>>,
}

impl ViewData {
    pub fn len(&self) -> usize {
        self.image.len()
    }
}

pub(crate) fn pose_offset(view: usize) -> usize {
    INTRINSIC_PARAMS + POSE_PARAMS * view
}

pub(crate) fn camera_from_params(full: &[f64]) -> PinholeCamera {
    PinholeCamera::new(
        CameraIntrinsics::new(full[0], full[1], full[2], full[3]),
        Distortion {
            k1: full[4],
            k2: full[5],
            p1: full[6],
            p2: full[7],
            k3: full[8],
        },
    )
}

pub(crate) fn pose_from_params(full: &[f64], view: usize) -> ViewPose {
    let o = pose_offset(view);
    ViewPose::new(
        [full[o], full[o + 1], full[o + 2]],
        [full[o + 3], full[o + 4], full[o + 5]],
    )
}

/// Residuals `projected − observed` of one view, interleaved x/y.
fn view_residuals(full: &[f64], view: usize, data: &ViewData, out: &mut [f64]) {
    let cam = camera_from_params(full);
    let o = pose_offset(view);
    let r = Rotation3::new(Vector3::new(full[o], full[o + 1], full[o + 2]));
    let t = Vector3::new(full[o + 3], full[o + 4], full[o + 5]);
    for (i, (obj, img)) in data.object.iter().zip(&data.image).enumerate() {
        let pc = r * obj + t;
        // no cheirality test: trial steps may briefly push points behind the camera
        let n = Point2::new(pc.x / pc.z, pc.y / pc.z);
        let p = cam
            .intrinsics
            .normalized_to_pixel(cam.distortion.distort(n));
        out[2 * i] = p.x - img.x;
        out[2 * i + 1] = p.y - img.y;
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ReprojectionProblem<'a> {
    views: &'a [ViewData],
    full: DVector<f64>,
    /// Full-vector index of every free parameter.
    free: Vec<usize>,
    /// Free column of every full-vector index.
    column: Vec<Option<usize>>,
    row_offsets: Vec<usize>,
    n_residuals: usize,
}

impl<'a> ReprojectionProblem<'a> {
    pub fn new(views: &'a [ViewData], full: DVector<f64>, fixed: &[usize]) -> Self {
        let free: Vec<usize> = (0..full.len()).filter(|i| !fixed.contains(i)).collect();
        let mut column = vec![None; full.len()];
        for (c, &i) in free.iter().enumerate() {
            column[i] = Some(c);
        }
        let mut row_offsets = Vec::with_capacity(views.len());
        let mut n_residuals = 0;
        for v in views {
            row_offsets.push(n_residuals);
            n_residuals += 2 * v.len();
        }
        Self {
            views,
            full,
            free,
            column,
            row_offsets,
            n_residuals,
        }
    }

    pub fn full(&self) -> &DVector<f64> {
        &self.full
    }

    pub fn free_indices(&self) -> &[usize] {
        &self.free
    }

    pub fn residual_count(&self) -> usize {
        self.n_residuals
    }

    /// Squared reprojection error summed per view.
    pub fn view_sse(&self) -> Vec<f64> {
        self.views
            .iter()
            .enumerate()
            .map(|(v, data)| {
                let mut r = vec![0.0; 2 * data.len()];
                view_residuals(self.full.as_slice(), v, data, &mut r);
                r.iter().map(|e| e * e).sum()
            })
            .collect()
    }

    fn all_residuals(&self) -> DVector<f64> {
        let mut r = DVector::zeros(self.n_residuals);
        for (v, data) in self.views.iter().enumerate() {
            let start = self.row_offsets[v];
            let rows = &mut r.as_mut_slice()[start..start + 2 * data.len()];
            view_residuals(self.full.as_slice(), v, data, rows);
        }
        r
    }

    /// Central-difference Jacobian. Each view only depends on the intrinsic
    /// block and its own pose block.
    pub fn numeric_jacobian(&self) -> DMatrix<f64> {
        let mut j = DMatrix::zeros(self.n_residuals, self.free.len());
        let mut x = self.full.as_slice().to_vec();
        for (v, data) in self.views.iter().enumerate() {
            let rows = 2 * data.len();
            let start = self.row_offsets[v];
            let mut plus = vec![0.0; rows];
            let mut minus = vec![0.0; rows];
            let params = (0..INTRINSIC_PARAMS).chain(pose_offset(v)..pose_offset(v) + POSE_PARAMS);
            for i in params {
                let Some(c) = self.column[i] else {
                    continue;
                };
                let x0 = x[i];
                let step = 1e-6 * x0.abs().max(1.0);
                x[i] = x0 + step;
                view_residuals(&x, v, data, &mut plus);
                x[i] = x0 - step;
                view_residuals(&x, v, data, &mut minus);
                x[i] = x0;
                for r in 0..rows {
                    j[(start + r, c)] = (plus[r] - minus[r]) / (2.0 * step);
                }
            }
        }
        j
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        for (c, &i) in self.free.iter().enumerate() {
            self.full[i] = x[c];
        }
    }

    fn params(&self) -> DVector<f64> {
        DVector::from_iterator(self.free.len(), self.free.iter().map(|&i| self.full[i]))
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self.all_residuals();
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let j = self.numeric_jacobian();
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn single_view() -> (Vec<ViewData>, DVector<f64>) {
        let mut full = vec![700.0, 710.0, 320.0, 240.0, -0.1, 0.02, 0.001, -0.002, 0.0];
        full.extend_from_slice(&[0.1, -0.2, 0.05, -40.0, -30.0, 400.0]);
        let full = DVector::from_vec(full);

        let object: Vec<Point3<f64>> = (0..12)
            .map(|i| Point3::new((i % 4) as f64 * 20.0, (i / 4) as f64 * 20.0, 0.0))
            .collect();
        let cam = camera_from_params(full.as_slice());
        let pose = pose_from_params(full.as_slice(), 0);
        let image = object
            .iter()
            .map(|p| cam.project(&pose.transform(p)).unwrap())
            .collect();
        (vec![ViewData { object, image }], full)
    }

    #[test]
    fn residuals_vanish_at_truth() {
        let (views, full) = single_view();
        let problem = ReprojectionProblem::new(&views, full, &[]);
        let r = problem.residuals().unwrap();
        assert_eq!(r.len(), 24);
        assert!(r.amax() < 1e-9);
    }

    #[test]
    fn fixed_parameters_are_hidden_from_the_solver() {
        let (views, full) = single_view();
        let mut problem = ReprojectionProblem::new(&views, full.clone(), &[2, 3, 8]);
        assert_eq!(problem.params().len(), full.len() - 3);
        assert_eq!(problem.jacobian().unwrap().ncols(), full.len() - 3);

        let mut x = problem.params();
        x[0] = 750.0;
        problem.set_params(&x);
        assert_eq!(problem.full()[0], 750.0);
        assert_eq!(problem.full()[2], 320.0);
    }

    #[test]
    fn jacobian_matches_analytic_focal_derivative() {
        let (views, full) = single_view();
        let problem = ReprojectionProblem::new(&views, full.clone(), &[]);
        let j = problem.jacobian().unwrap();
        // u = fx * xd + cx, so ∂u/∂fx = (u - cx) / fx
        let r = problem.residuals().unwrap();
        for i in 0..views[0].len() {
            let u = r[2 * i] + views[0].image[i].x;
            assert_relative_eq!(j[(2 * i, 0)], (u - full[2]) / full[0], epsilon = 1e-6);
            assert_relative_eq!(j[(2 * i, 2)], 1.0, epsilon = 1e-6);
            assert_relative_eq!(j[(2 * i + 1, 2)], 0.0, epsilon = 1e-6);
        }
    }
}
