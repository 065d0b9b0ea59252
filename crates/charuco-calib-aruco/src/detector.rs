//! Marker detection on full images.

use crate::contour::{approx_closed_polygon, is_convex, label_components, signed_area2, trace_outer_boundary};
use crate::decode::{DecodeParams, QuadDecoder};
use crate::subpix::{refine_corners_subpix, SubPixParams};
use crate::threshold::{adaptive_threshold_inv, IntegralImage};
use crate::{MarkerDictionary, Matcher};
use charuco_calib_core::GrayImageView;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Detector parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerDetectorParams {
    /// Adaptive threshold window sizes (pixels, odd); one pass each.
    pub threshold_windows: Vec<usize>,
    /// Offset subtracted from the local mean.
    pub threshold_constant: f32,
    /// Contour length bounds relative to `max(width, height)`.
    pub min_perimeter_rate: f32,
    pub max_perimeter_rate: f32,
    /// Douglas–Peucker tolerance relative to contour length.
    pub polygon_accuracy_rate: f32,
    /// Minimum quad side relative to contour length.
    pub min_corner_distance_rate: f32,
    /// Minimum distance of any quad corner to the image border (pixels).
    pub min_distance_to_border: f32,
    /// Quads whose corners are closer than this (relative to perimeter) are merged.
    pub min_marker_distance_rate: f32,
    /// Fraction of the dictionary's correction capacity used when matching.
    pub error_correction_rate: f32,
    pub decode: DecodeParams,
    /// Sub-pixel refinement of accepted marker corners.
    pub refine: Option<SubPixParams>,
}

impl Default for MarkerDetectorParams {
    fn default() -> Self {
        Self {
            threshold_windows: vec![3, 13, 23],
            threshold_constant: 7.0,
            min_perimeter_rate: 0.03,
            max_perimeter_rate: 4.0,
            polygon_accuracy_rate: 0.03,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3.0,
            min_marker_distance_rate: 0.05,
            error_correction_rate: 0.6,
            decode: DecodeParams::default(),
            refine: Some(SubPixParams::default()),
        }
    }
}

/// One decoded marker.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedMarker {
    pub id: u32,
    /// Image corners in the marker's own order: TL, TR, BR, BL.
    pub corners: [Point2<f32>; 4],
    pub hamming: u8,
    pub border_score: f32,
}

impl DetectedMarker {
    /// Mean side length in pixels.
    pub fn side_length(&self) -> f32 {
        (0..4)
            .map(|i| (self.corners[(i + 1) % 4] - self.corners[i]).norm())
            .sum::<f32>()
            / 4.0
    }
}

/// Markers found in one image plus the candidates that failed to decode.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MarkerDetectionResult {
    /// Sorted by id; one entry per id.
    pub markers: Vec<DetectedMarker>,
    pub rejected: Vec<[Point2<f32>; 4]>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MarkerDetectorError {
    #[error("dictionary {name} has unsupported marker size {size}")]
    UnsupportedMarkerSize { name: String, size: usize },
    #[error("dictionary {0} is empty")]
    EmptyDictionary(String),
}

/// Finds square markers of one dictionary.
#[derive(Clone, Debug)]
pub struct MarkerDetector {
    dictionary: Arc<dyn MarkerDictionary>,
    params: MarkerDetectorParams,
    matcher: Matcher,
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    corners: [Point2<f32>; 4],
    perimeter: f32,
}

impl MarkerDetector {
    pub fn new(
        dictionary: Arc<dyn MarkerDictionary>,
        params: MarkerDetectorParams,
    ) -> Result<Self, MarkerDetectorError> {
        if dictionary.is_empty() {
            return Err(MarkerDetectorError::EmptyDictionary(dictionary.name().to_string()));
        }
        let max_hamming = (params.error_correction_rate.clamp(0.0, 1.0)
            * dictionary.max_correction_bits() as f32)
            .floor() as u8;
        let matcher = Matcher::new(dictionary.as_ref(), max_hamming).ok_or_else(|| {
            MarkerDetectorError::UnsupportedMarkerSize {
                name: dictionary.name().to_string(),
                size: dictionary.marker_size(),
            }
        })?;
        Ok(Self {
            dictionary,
            params,
            matcher,
        })
    }

    pub fn dictionary(&self) -> &Arc<dyn MarkerDictionary> {
        &self.dictionary
    }

    pub fn params(&self) -> &MarkerDetectorParams {
        &self.params
    }

    /// Detect and decode markers.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img), fields(w = img.width, h = img.height))
    )]
    pub fn detect(&self, img: &GrayImageView<'_>) -> MarkerDetectionResult {
        let candidates = self.collect_candidates(img);
        let Some(mut decoder) = QuadDecoder::new(&self.params.decode, self.matcher.marker_size())
        else {
            return MarkerDetectionResult::default();
        };

        let mut best: HashMap<u32, DetectedMarker> = HashMap::new();
        let mut rejected = Vec::new();

        for cand in candidates {
            let decoded = decoder
                .read(img, &cand.corners)
                .and_then(|obs| self.matcher.match_code(obs.code).map(|m| (m, obs)));
            let Some((m, obs)) = decoded else {
                rejected.push(cand.corners);
                continue;
            };

            // corner i of the marker sits at quad corner (i + rotation) % 4
            let r = m.rotation as usize;
            let corners = std::array::from_fn(|i| cand.corners[(i + r) % 4]);
            let det = DetectedMarker {
                id: m.id,
                corners,
                hamming: m.hamming,
                border_score: obs.border_score,
            };
            let better = best.get(&m.id).map_or(true, |prev| {
                (det.hamming, -det.border_score) < (prev.hamming, -prev.border_score)
            });
            if better {
                best.insert(m.id, det);
            }
        }

        let mut markers: Vec<DetectedMarker> = best.into_values().collect();
        markers.sort_by_key(|m| m.id);

        if let Some(refine) = &self.params.refine {
            for m in &mut markers {
                refine_corners_subpix(img, &mut m.corners, refine);
            }
        }

        log::debug!(
            "marker detection: {} markers, {} rejected candidates",
            markers.len(),
            rejected.len()
        );
        MarkerDetectionResult { markers, rejected }
    }

    /// Convex quadrilateral candidates, clockwise (image y down), deduplicated.
    pub fn find_candidates(&self, img: &GrayImageView<'_>) -> Vec<[Point2<f32>; 4]> {
        self.collect_candidates(img)
            .into_iter()
            .map(|c| c.corners)
            .collect()
    }

    fn collect_candidates(&self, img: &GrayImageView<'_>) -> Vec<Candidate> {
        let (w, h) = (img.width, img.height);
        if w < 3 || h < 3 {
            return Vec::new();
        }
        let p = &self.params;
        let max_dim = w.max(h) as f32;
        let min_len = (p.min_perimeter_rate * max_dim).max(8.0) as usize;
        let max_len = (p.max_perimeter_rate * max_dim) as usize;
        let integral = IntegralImage::new(img);

        let mut out: Vec<Candidate> = Vec::new();
        for &window in &p.threshold_windows {
            let mask = adaptive_threshold_inv(img, &integral, window, p.threshold_constant);
            let (labels, comps) = label_components(&mask, w, h);

            for comp in comps {
                // a closed outline needs at least a few pixels per side
                if comp.area < min_len / 2 {
                    continue;
                }
                let bw = (comp.bbox[2] - comp.bbox[0] + 1) as usize;
                let bh = (comp.bbox[3] - comp.bbox[1] + 1) as usize;
                if 2 * (bw + bh) < min_len {
                    continue;
                }
                let contour = trace_outer_boundary(&labels, w, h, comp.label, comp.start);
                if contour.len() < min_len || contour.len() > max_len {
                    continue;
                }
                if let Some(c) = self.quad_from_contour(&contour, w, h) {
                    out.push(c);
                }
            }
        }

        self.merge_close_candidates(out)
    }

    fn quad_from_contour(&self, contour: &[(i32, i32)], w: usize, h: usize) -> Option<Candidate> {
        let p = &self.params;
        let perimeter = contour.len() as f64;
        let poly = approx_closed_polygon(contour, perimeter * p.polygon_accuracy_rate as f64);
        if poly.len() != 4 || !is_convex(&poly) {
            return None;
        }

        let min_side = perimeter * p.min_corner_distance_rate as f64;
        for i in 0..4 {
            if (poly[(i + 1) % 4] - poly[i]).norm() < min_side {
                return None;
            }
        }
        let border = p.min_distance_to_border as f64;
        if poly.iter().any(|q| {
            q.x < border || q.y < border || q.x > w as f64 - 1.0 - border || q.y > h as f64 - 1.0 - border
        }) {
            return None;
        }

        let mut corners: [Point2<f32>; 4] =
            std::array::from_fn(|i| Point2::new(poly[i].x as f32, poly[i].y as f32));
        if signed_area2(&poly) < 0.0 {
            corners.swap(1, 3);
        }
        Some(Candidate {
            corners,
            perimeter: perimeter as f32,
        })
    }

    /// Keep one candidate per physical quad (the one with the longest outline).
    fn merge_close_candidates(&self, mut cands: Vec<Candidate>) -> Vec<Candidate> {
        cands.sort_by(|a, b| b.perimeter.total_cmp(&a.perimeter));
        let rate = self.params.min_marker_distance_rate;
        let mut kept: Vec<Candidate> = Vec::with_capacity(cands.len());
        for c in cands {
            let tol = rate * c.perimeter;
            let duplicate = kept
                .iter()
                .any(|k| min_mean_corner_distance(&k.corners, &c.corners) < tol);
            if !duplicate {
                kept.push(c);
            }
        }
        kept
    }
}

/// Mean corner distance minimized over the four cyclic correspondences.
fn min_mean_corner_distance(a: &[Point2<f32>; 4], b: &[Point2<f32>; 4]) -> f32 {
    (0..4)
        .map(|shift| {
            (0..4)
                .map(|i| (a[i] - b[(i + shift) % 4]).norm())
                .sum::<f32>()
                / 4.0
        })
        .fold(f32::INFINITY, f32::min)
}
