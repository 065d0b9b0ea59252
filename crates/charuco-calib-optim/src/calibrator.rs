use crate::init::{centered_intrinsics, zhang_intrinsics};
use crate::planar_pose::pose_from_homography;
use crate::problem::{
    camera_from_params, pose_from_params, pose_offset, ReprojectionProblem, ViewData, POSE_PARAMS,
};
use crate::CalibrationError;
use charuco_calib_core::{
    estimate_homography, CalibrationSample, CameraIntrinsics, CameraModel, PlanarTarget,
    StdDeviations, INTRINSIC_PARAMS,
};
use levenberg_marquardt::{LevenbergMarquardt, TerminationReason};
use nalgebra::{DVector, Matrix3, Point2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// How the linear intrinsics are seeded before refinement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitMethod {
    /// Principal point at the image centre, focal lengths from the
    /// homographies. Works from two views.
    #[default]
    CenteredPrincipalPoint,
    /// Zhang's closed form (≥ 3 views); falls back to the centred estimate.
    Zhang,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationOptions {
    pub min_views: usize,
    /// Views with fewer correspondences are dropped before solving.
    pub min_corners: usize,
    /// Levenberg–Marquardt patience; the evaluation budget is
    /// `max_iters * (free parameters + 1)`.
    pub max_iters: usize,
    /// ftol / xtol / gtol of the solver.
    pub tolerance: f64,
    pub init: InitMethod,
    pub fix_principal_point: bool,
    pub fix_k3: bool,
    pub zero_tangent_dist: bool,
    pub compute_std_deviations: bool,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            min_views: 2,
            min_corners: 6,
            max_iters: 100,
            tolerance: 1e-10,
            init: InitMethod::default(),
            fix_principal_point: false,
            fix_k3: false,
            zero_tangent_dist: false,
            compute_std_deviations: true,
        }
    }
}

impl CalibrationOptions {
    fn fixed_intrinsics(&self) -> Vec<usize> {
        let mut fixed = Vec::new();
        if self.fix_principal_point {
            fixed.extend([2, 3]);
        }
        if self.zero_tangent_dist {
            fixed.extend([6, 7]);
        }
        if self.fix_k3 {
            fixed.push(8);
        }
        fixed
    }
}

/// Estimate intrinsics, distortion and per-view poses from planar-target
/// correspondences.
///
/// Views are reported in the order of the samples that were kept (samples
/// below `min_corners` are skipped with a warning).
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(samples, target, options), fields(samples = samples.len()))
)]
pub fn calibrate(
    samples: &[CalibrationSample],
    target: &dyn PlanarTarget,
    options: &CalibrationOptions,
) -> Result<CameraModel, CalibrationError> {
    let min_corners = options.min_corners.max(4);
    let mut used: Vec<&CalibrationSample> = Vec::with_capacity(samples.len());
    for s in samples {
        if s.len() < min_corners {
            log::warn!(
                "dropping view {}: {} corners < {}",
                s.label(),
                s.len(),
                min_corners
            );
            continue;
        }
        used.push(s);
    }
    let required = options.min_views.max(2);
    if used.len() < required {
        return Err(CalibrationError::InsufficientViews {
            required,
            got: used.len(),
        });
    }

    let image_size = used[0].image_size();
    let mut views = Vec::with_capacity(used.len());
    let mut homographies = Vec::with_capacity(used.len());
    for (v, s) in used.iter().enumerate() {
        if s.image_size() != image_size {
            return Err(CalibrationError::ImageSizeMismatch {
                view: v,
                label: s.label().to_string(),
                expected: image_size,
                got: s.image_size(),
            });
        }
        let data = view_data(s, target);
        let board: Vec<Point2<f64>> = data.object.iter().map(|p| Point2::new(p.x, p.y)).collect();
        let h = estimate_homography(&board, &data.image).ok_or_else(|| {
            CalibrationError::DegenerateHomography {
                view: v,
                label: s.label().to_string(),
            }
        })?;
        homographies.push(h.h);
        views.push(data);
    }

    let k0 = initial_intrinsics(&homographies, image_size, options.init)?;
    log::debug!(
        "initial intrinsics fx={:.2} fy={:.2} cx={:.2} cy={:.2}",
        k0.fx,
        k0.fy,
        k0.cx,
        k0.cy
    );

    let mut full = vec![0.0; pose_offset(views.len())];
    full[..4].copy_from_slice(&[k0.fx, k0.fy, k0.cx, k0.cy]);
    let km = k0.matrix();
    for (v, h) in homographies.iter().enumerate() {
        let pose = pose_from_homography(&km, h)
            .ok_or(CalibrationError::InitializationFailed("pose decomposition failed"))?;
        let o = pose_offset(v);
        full[o..o + 3].copy_from_slice(&pose.rvec);
        full[o + 3..o + 6].copy_from_slice(&pose.tvec);
    }

    let fixed = options.fixed_intrinsics();
    let problem = ReprojectionProblem::new(&views, DVector::from_vec(full), &fixed);
    let lm = LevenbergMarquardt::new()
        .with_ftol(options.tolerance)
        .with_xtol(options.tolerance)
        .with_gtol(options.tolerance)
        .with_patience(options.max_iters.max(1));
    let (problem, report) = lm.minimize(problem);
    match &report.termination {
        t if t.was_successful() => {}
        TerminationReason::LostPatience => {
            log::warn!("calibration stopped at the evaluation budget before converging");
        }
        TerminationReason::NoImprovementPossible(what) => {
            log::debug!("calibration converged: no further improvement ({what})");
        }
        other => return Err(CalibrationError::SolverFailed(format!("{other:?}"))),
    }
    log::debug!(
        "solver finished after {} evaluations ({:?})",
        report.number_of_evaluations,
        report.termination
    );

    let full = problem.full().as_slice().to_vec();
    let camera = camera_from_params(&full);
    let poses: Vec<_> = (0..views.len()).map(|v| pose_from_params(&full, v)).collect();

    let view_sse = problem.view_sse();
    let total_points: usize = views.iter().map(ViewData::len).sum();
    let sse: f64 = view_sse.iter().sum();
    let rms_error = (sse / total_points as f64).sqrt();
    let per_view_errors = view_sse
        .iter()
        .zip(&views)
        .map(|(e, v)| (e / v.len() as f64).sqrt())
        .collect();

    let std_deviations = if options.compute_std_deviations {
        Some(std_deviations(&problem, sse, views.len())?)
    } else {
        None
    };

    let model = CameraModel {
        intrinsics: camera.intrinsics,
        distortion: camera.distortion,
        views: poses,
        rms_error,
        per_view_errors,
        std_deviations,
        image_size: Some(image_size),
    };
    model
        .validate()
        .map_err(|e| CalibrationError::InvalidSolution(e.to_string()))?;
    log::info!(
        "calibrated {} views ({} corners): rms reprojection error {:.4} px",
        views.len(),
        total_points,
        rms_error
    );
    Ok(model)
}

fn view_data(sample: &CalibrationSample, target: &dyn PlanarTarget) -> ViewData {
    let (object, image) = sample
        .correspondences()
        .iter()
        .filter_map(|c| Some((target.object_point(c.id)?, c.image)))
        .unzip();
    ViewData { object, image }
}

fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: [u32; 2],
    method: InitMethod,
) -> Result<CameraIntrinsics, CalibrationError> {
    if method == InitMethod::Zhang {
        match zhang_intrinsics(homographies) {
            Some(k) => return Ok(k),
            None => log::warn!("Zhang initialization is degenerate; using a centred principal point"),
        }
    }
    centered_intrinsics(homographies, image_size).ok_or(CalibrationError::InitializationFailed(
        "focal lengths are not constrained by the views",
    ))
}

/// `σ = sqrt(diag((JᵀJ)⁻¹) · SSE / (2N − P))` with zeros for fixed parameters.
fn std_deviations(
    problem: &ReprojectionProblem<'_>,
    sse: f64,
    n_views: usize,
) -> Result<StdDeviations, CalibrationError> {
    let j = problem.numeric_jacobian();
    let jtj = j.transpose() * &j;
    let cov = jtj
        .cholesky()
        .map(|c| c.inverse())
        .ok_or(CalibrationError::SingularJacobian)?;
    let dof = problem.residual_count().saturating_sub(problem.free_indices().len());
    let sigma2 = sse / dof.max(1) as f64;

    let mut full_std = vec![0.0; pose_offset(n_views)];
    for (c, &i) in problem.free_indices().iter().enumerate() {
        full_std[i] = (cov[(c, c)].max(0.0) * sigma2).sqrt();
    }
    let mut intrinsics = [0.0; INTRINSIC_PARAMS];
    intrinsics.copy_from_slice(&full_std[..INTRINSIC_PARAMS]);
    let extrinsics = (0..n_views)
        .map(|v| {
            let o = pose_offset(v);
            let mut e = [0.0; POSE_PARAMS];
            e.copy_from_slice(&full_std[o..o + POSE_PARAMS]);
            e
        })
        .collect();
    Ok(StdDeviations {
        intrinsics,
        extrinsics,
    })
}
