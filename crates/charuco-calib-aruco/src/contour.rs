//! Connected components, outer boundary tracing and polygon approximation.

use nalgebra::Point2;

/// Moore neighbourhood, clockwise in image coordinates (y down).
const DIRS_8: [(i32, i32); 8] = [
    (1, 0),   // E
    (1, 1),   // SE
    (0, 1),   // S
    (-1, 1),  // SW
    (-1, 0),  // W
    (-1, -1), // NW
    (0, -1),  // N
    (1, -1),  // NE
];

/// One 4-connected foreground component.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Component {
    pub label: u32,
    pub area: usize,
    /// First pixel in raster order; always on the outer boundary.
    pub start: (i32, i32),
    /// `[x0, y0, x1, y1]`, inclusive.
    pub bbox: [i32; 4],
}

/// Label 4-connected foreground regions. Label `0` is background.
pub(crate) fn label_components(mask: &[bool], w: usize, h: usize) -> (Vec<u32>, Vec<Component>) {
    let mut labels = vec![0u32; w * h];
    let mut comps = Vec::new();
    let mut stack = Vec::new();

    for y0 in 0..h {
        for x0 in 0..w {
            let idx0 = y0 * w + x0;
            if !mask[idx0] || labels[idx0] != 0 {
                continue;
            }
            let label = comps.len() as u32 + 1;
            labels[idx0] = label;
            stack.push((x0, y0));
            let mut comp = Component {
                label,
                area: 0,
                start: (x0 as i32, y0 as i32),
                bbox: [x0 as i32, y0 as i32, x0 as i32, y0 as i32],
            };

            while let Some((x, y)) = stack.pop() {
                comp.area += 1;
                comp.bbox[0] = comp.bbox[0].min(x as i32);
                comp.bbox[1] = comp.bbox[1].min(y as i32);
                comp.bbox[2] = comp.bbox[2].max(x as i32);
                comp.bbox[3] = comp.bbox[3].max(y as i32);

                let mut visit = |nx: usize, ny: usize| {
                    let n = ny * w + nx;
                    if mask[n] && labels[n] == 0 {
                        labels[n] = label;
                        stack.push((nx, ny));
                    }
                };
                if x > 0 {
                    visit(x - 1, y);
                }
                if x + 1 < w {
                    visit(x + 1, y);
                }
                if y > 0 {
                    visit(x, y - 1);
                }
                if y + 1 < h {
                    visit(x, y + 1);
                }
            }
            comps.push(comp);
        }
    }

    (labels, comps)
}

/// Trace the outer boundary of the component `label` starting at its
/// raster-first pixel.
///
/// Each boundary pixel appears once per visit; the trace ends when the
/// start pixel is about to be left towards the same neighbour as on the
/// first step, so it closes regardless of the direction it re-enters from.
pub(crate) fn trace_outer_boundary(
    labels: &[u32],
    w: usize,
    h: usize,
    label: u32,
    start: (i32, i32),
) -> Vec<(i32, i32)> {
    let (wi, hi) = (w as i32, h as i32);
    let inside = |x: i32, y: i32| {
        x >= 0 && y >= 0 && x < wi && y < hi && labels[(y * wi + x) as usize] == label
    };
    // clockwise search from the neighbour after the last known background one
    let step = |(x, y): (i32, i32), back: usize| {
        (1..=8).map(|s| (back + s) % 8).find_map(|k| {
            let next = (x + DIRS_8[k].0, y + DIRS_8[k].1);
            inside(next.0, next.1).then_some((next, k))
        })
    };

    let mut contour = Vec::new();
    let mut current = start;
    // nothing lies west of the raster-first pixel
    let mut back = 4usize;
    let mut first_step = None;
    let max_steps = (w * h).saturating_mul(4).max(32);

    for _ in 0..max_steps {
        let Some((next, k)) = step(current, back) else {
            // isolated pixel
            contour.push(current);
            break;
        };
        if current == start {
            match first_step {
                None => first_step = Some(next),
                Some(first) if first == next => break,
                Some(_) => {}
            }
        }
        contour.push(current);
        // the neighbour checked just before `k`, seen from `next`
        back = if k % 2 == 0 { (k + 6) % 8 } else { (k + 5) % 8 };
        current = next;
    }
    contour
}

fn point_line_distance(p: Point2<f64>, a: Point2<f64>, b: Point2<f64>) -> f64 {
    let ab = b - a;
    let len = ab.norm();
    if len < 1e-12 {
        return (p - a).norm();
    }
    (ab.x * (p.y - a.y) - ab.y * (p.x - a.x)).abs() / len
}

fn rdp(points: &[Point2<f64>], epsilon: f64, out: &mut Vec<Point2<f64>>) {
    if points.len() < 2 {
        out.extend_from_slice(points);
        return;
    }
    let first = points[0];
    let last = points[points.len() - 1];
    let mut max_dist = 0.0f64;
    let mut idx = 0usize;
    for (i, &p) in points.iter().enumerate().take(points.len() - 1).skip(1) {
        let d = point_line_distance(p, first, last);
        if d > max_dist {
            max_dist = d;
            idx = i;
        }
    }

    if max_dist > epsilon && idx > 0 {
        rdp(&points[..=idx], epsilon, out);
        out.pop();
        rdp(&points[idx..], epsilon, out);
    } else {
        out.push(first);
        out.push(last);
    }
}

/// Douglas–Peucker approximation of a closed contour.
///
/// The ring is split at the point farthest from its first point so that
/// neither half is degenerate; vertices that end up nearly collinear with
/// their neighbours are dropped afterwards.
pub(crate) fn approx_closed_polygon(contour: &[(i32, i32)], epsilon: f64) -> Vec<Point2<f64>> {
    let pts: Vec<Point2<f64>> = contour
        .iter()
        .map(|&(x, y)| Point2::new(x as f64, y as f64))
        .collect();
    if pts.len() < 4 {
        return pts;
    }

    let p0 = pts[0];
    let (far, _) = pts
        .iter()
        .enumerate()
        .map(|(i, p)| (i, (p - p0).norm_squared()))
        .fold((0usize, -1.0f64), |best, cur| if cur.1 > best.1 { cur } else { best });
    if far == 0 {
        return vec![p0];
    }

    let mut first_half = Vec::new();
    rdp(&pts[..=far], epsilon, &mut first_half);
    let mut ring: Vec<Point2<f64>> = pts[far..].to_vec();
    ring.push(p0);
    let mut second_half = Vec::new();
    rdp(&ring, epsilon, &mut second_half);

    let mut poly = first_half;
    poly.pop();
    poly.extend(second_half);
    poly.pop();
    poly.dedup();

    // drop vertices that sit on the chord of their neighbours
    let mut changed = true;
    while changed && poly.len() > 3 {
        changed = false;
        let n = poly.len();
        for i in 0..n {
            let prev = poly[(i + n - 1) % n];
            let next = poly[(i + 1) % n];
            if point_line_distance(poly[i], prev, next) <= epsilon {
                poly.remove(i);
                changed = true;
                break;
            }
        }
    }
    poly
}

/// Twice the signed area (positive for clockwise order with y down).
pub(crate) fn signed_area2(poly: &[Point2<f64>]) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| {
            let a = poly[i];
            let b = poly[(i + 1) % n];
            a.x * b.y - b.x * a.y
        })
        .sum()
}

/// Strict convexity of a polygon in either orientation.
pub(crate) fn is_convex(poly: &[Point2<f64>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];
        let c = poly[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross.abs() < 1e-12 {
            return false;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }
    true
}
