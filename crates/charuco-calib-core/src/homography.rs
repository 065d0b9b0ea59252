use nalgebra::{Matrix3, Point2, SMatrix, SymmetricEigen, Vector3};

/// Planar projective transform `p_dst ~ H * p_src`, normalized so `H[2,2] = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    #[inline]
    pub fn apply_f32(&self, p: Point2<f32>) -> Point2<f32> {
        let q = self.apply(Point2::new(p.x as f64, p.y as f64));
        Point2::new(q.x as f32, q.y as f32)
    }
}

/// Similarity moving the centroid to the origin with mean distance sqrt(2).
fn conditioning(pts: &[Point2<f64>]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let c = pts.iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / n;
    let spread = pts.iter().map(|p| (p.x - c.x).hypot(p.y - c.y)).sum::<f64>() / n;
    let s = if spread > 1e-12 { std::f64::consts::SQRT_2 / spread } else { 1.0 };
    Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
}

fn transform(t: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x, v.y)
}

/// Estimate H with the normalized DLT from four or more correspondences.
///
/// The null vector of the stacked DLT system is taken from the 9×9 normal
/// matrix, so the exactly determined four-point case needs no special path.
/// Returns `None` for mismatched inputs, fewer than four points, or point
/// sets that do not pin down a unique non-singular H (e.g. collinear).
pub fn estimate_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let t_src = conditioning(src);
    let t_dst = conditioning(dst);

    let mut normal = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let p = transform(&t_src, s);
        let q = transform(&t_dst, d);
        let rows = [
            [-p.x, -p.y, -1.0, 0.0, 0.0, 0.0, q.x * p.x, q.x * p.y, q.x],
            [0.0, 0.0, 0.0, -p.x, -p.y, -1.0, q.y * p.x, q.y * p.y, q.y],
        ];
        for row in rows {
            let r = SMatrix::<f64, 1, 9>::from_row_slice(&row);
            normal += r.transpose() * r;
        }
    }

    let eig = SymmetricEigen::new(normal);
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));
    let largest = eig.eigenvalues[order[8]];
    if !(largest > 0.0) || eig.eigenvalues[order[1]] < 1e-12 * largest {
        return None;
    }
    let v = eig.eigenvectors.column(order[0]);
    let hn = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let h = t_dst.try_inverse()? * hn * t_src;
    let scale = h[(2, 2)];
    if !scale.is_finite() || scale.abs() < 1e-12 {
        return None;
    }
    let h = h / scale;
    if h.determinant().abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h))
}

/// H from exactly four correspondences given in the same corner order.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    estimate_homography(src, dst)
}

/// [`homography_from_4pt`] for detector (`f32`) quads.
pub fn homography_from_4pt_f32(
    src: &[Point2<f32>; 4],
    dst: &[Point2<f32>; 4],
) -> Option<Homography> {
    let cast = |p: &Point2<f32>| Point2::new(p.x as f64, p.y as f64);
    homography_from_4pt(&src.each_ref().map(cast), &dst.each_ref().map(cast))
}
