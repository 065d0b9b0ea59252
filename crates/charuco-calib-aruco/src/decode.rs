//! Bit sampling and decoding of one marker quad.

use crate::threshold::otsu_threshold_from_samples;
use crate::{Match, Matcher};
use charuco_calib_core::{homography_from_4pt_f32, GrayImageView, Homography};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Cell sampling configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeParams {
    /// Marker border width in cells.
    pub border_bits: usize,
    /// Fraction of the marker side ignored at each edge before sampling.
    pub inset_frac: f32,
    /// Minimum fraction of border cells that must read black.
    pub min_border_score: f32,
    /// Also try white-on-black markers.
    pub allow_inverted: bool,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            border_bits: 1,
            inset_frac: 0.0,
            min_border_score: 0.75,
            allow_inverted: false,
        }
    }
}

/// Bits read from one quad.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarkerObservation {
    /// Inner bits (row-major, black = 1) in quad order.
    pub code: u64,
    pub border_score: f32,
    pub inverted: bool,
}

/// Cell side on the canonical marker square.
const CANONICAL_CELL: f32 = 10.0;
/// Histogram samples per cell side.
const HISTOGRAM_SUBDIV: usize = 3;

/// Reusable sampler for one marker size.
pub(crate) struct QuadDecoder<'a> {
    params: &'a DecodeParams,
    bits: usize,
    cells: usize,
    canonical: [Point2<f32>; 4],
    /// Row-major cell centres on the canonical square.
    cell_centres: Vec<Point2<f32>>,
    /// Denser grid feeding the Otsu histogram.
    histogram_points: Vec<Point2<f32>>,
    cell_values: Vec<u8>,
    histogram_values: Vec<u8>,
}

impl<'a> QuadDecoder<'a> {
    pub(crate) fn new(params: &'a DecodeParams, bits: usize) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }
        let cells = bits + 2 * params.border_bits;
        let s = cells as f32 * CANONICAL_CELL;
        let inset = (params.inset_frac.clamp(0.0, 0.2) * s).max(0.0);
        let side = s - 2.0 * inset;

        Some(Self {
            params,
            bits,
            cells,
            canonical: [
                Point2::new(0.0, 0.0),
                Point2::new(s, 0.0),
                Point2::new(s, s),
                Point2::new(0.0, s),
            ],
            cell_centres: grid_centres(inset, side, cells),
            histogram_points: grid_centres(inset, side, cells * HISTOGRAM_SUBDIV),
            cell_values: Vec::with_capacity(cells * cells),
            histogram_values: Vec::new(),
        })
    }

    /// Read the bits of the quad `corners` (clockwise, corner 0 first).
    pub(crate) fn read(
        &mut self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f32>; 4],
    ) -> Option<MarkerObservation> {
        let h = homography_from_4pt_f32(&self.canonical, corners)?;
        self.read_warped(img, &h)
    }

    fn read_warped(&mut self, img: &GrayImageView<'_>, h: &Homography) -> Option<MarkerObservation> {
        self.cell_values.clear();
        for p in &self.cell_centres {
            self.cell_values.push(box_mean(img, h.apply_f32(*p))?);
        }
        self.histogram_values.clear();
        self.histogram_values
            .extend(self.histogram_points.iter().filter_map(|p| box_mean(img, h.apply_f32(*p))));

        decode_samples(
            &self.cell_values,
            &self.histogram_values,
            self.cells,
            self.bits,
            self.params,
        )
    }
}

/// Decode a quad against a matcher; returns the match and the observation.
pub fn decode_quad(
    img: &GrayImageView<'_>,
    corners: &[Point2<f32>; 4],
    params: &DecodeParams,
    matcher: &Matcher,
) -> Option<(Match, MarkerObservation)> {
    let mut decoder = QuadDecoder::new(params, matcher.marker_size())?;
    let obs = decoder.read(img, corners)?;
    let m = matcher.match_code(obs.code)?;
    Some((m, obs))
}

fn decode_samples(
    samples: &[u8],
    thr_samples: &[u8],
    cells: usize,
    bits: usize,
    params: &DecodeParams,
) -> Option<MarkerObservation> {
    if samples.len() != cells * cells {
        return None;
    }

    let thr = otsu_threshold_from_samples(if thr_samples.is_empty() { samples } else { thr_samples });

    let border = params.border_bits;
    let polarities: &[bool] = if params.allow_inverted {
        &[false, true]
    } else {
        &[false]
    };
    let mut best: Option<MarkerObservation> = None;

    for &inverted in polarities {
        let mut border_ok = 0u32;
        let mut border_total = 0u32;
        let mut code: u64 = 0;

        for cy in 0..cells {
            for cx in 0..cells {
                let m = samples[cy * cells + cx];
                let is_black = (m < thr) != inverted;

                let is_border =
                    cx < border || cy < border || cx + border >= cells || cy + border >= cells;
                if is_border {
                    border_total += 1;
                    border_ok += is_black as u32;
                } else {
                    let idx = (cy - border) * bits + (cx - border);
                    code |= (is_black as u64) << idx;
                }
            }
        }

        let border_score = if border_total > 0 {
            border_ok as f32 / border_total as f32
        } else {
            1.0
        };
        if border_score < params.min_border_score {
            continue;
        }

        if best.map_or(true, |b| border_score > b.border_score) {
            best = Some(MarkerObservation {
                code,
                border_score,
                inverted,
            });
        }
    }

    best
}

/// Centres of an `n × n` grid over the square `[start, start + side]²`.
fn grid_centres(start: f32, side: f32, n: usize) -> Vec<Point2<f32>> {
    let step = side / n as f32;
    (0..n * n)
        .map(|i| {
            let (col, row) = (i % n, i / n);
            Point2::new(start + (col as f32 + 0.5) * step, start + (row as f32 + 0.5) * step)
        })
        .collect()
}

/// Mean of the 3×3 pixel block containing `p`; `None` near the border.
fn box_mean(img: &GrayImageView<'_>, p: Point2<f32>) -> Option<u8> {
    if !p.x.is_finite() || !p.y.is_finite() {
        return None;
    }
    let (cx, cy) = (p.x.floor() as i32, p.y.floor() as i32);
    let mut sum = 0u32;
    for y in cy - 1..=cy + 1 {
        for x in cx - 1..=cx + 1 {
            sum += u32::from(img.get(x, y)?);
        }
    }
    Some((sum / 9) as u8)
}
