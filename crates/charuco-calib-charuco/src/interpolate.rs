//! ChArUco corner interpolation from detected markers.
//!
//! Every detected marker gives a local board→image homography from its four
//! corners. Each interior corner touching enough detected markers is
//! predicted by averaging those homographies' projections, then snapped to
//! the saddle point with sub-pixel refinement.

use crate::CharucoBoard;
use charuco_calib_aruco::{refine_corner_subpix, DetectedMarker, SubPixParams};
use charuco_calib_core::{homography_from_4pt, CornerCorrespondence, GrayImageView, Homography};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Interpolation parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrespondenceParams {
    /// Detected markers that must touch a corner before it is reported
    /// (capped at the number of markers the corner actually touches).
    pub min_adjacent_markers: usize,
    /// Saddle refinement; `half_window` is further limited per corner to
    /// half the distance to the nearest marker corner.
    pub refine: Option<SubPixParams>,
}

impl Default for CorrespondenceParams {
    fn default() -> Self {
        Self {
            min_adjacent_markers: 2,
            refine: Some(SubPixParams::default()),
        }
    }
}

/// Turns marker detections into ChArUco corner correspondences.
#[derive(Clone, Debug)]
pub struct CorrespondenceBuilder<'a> {
    board: &'a CharucoBoard,
    params: CorrespondenceParams,
}

#[derive(Default)]
struct Prediction {
    sum: nalgebra::Vector2<f64>,
    count: usize,
    nearest_feature: f64,
}

impl<'a> CorrespondenceBuilder<'a> {
    pub fn new(board: &'a CharucoBoard, params: CorrespondenceParams) -> Self {
        Self { board, params }
    }

    pub fn params(&self) -> &CorrespondenceParams {
        &self.params
    }

    /// Interpolate and refine corners. The result has unique ids in
    /// ascending order; markers not on the board are ignored.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, img, markers), fields(markers = markers.len()))
    )]
    pub fn build(
        &self,
        img: &GrayImageView<'_>,
        markers: &[DetectedMarker],
    ) -> Vec<CornerCorrespondence> {
        let mut predictions: BTreeMap<u32, Prediction> = BTreeMap::new();

        for m in markers {
            let Some(h) = self.marker_homography(m) else {
                log::debug!("marker {} has no usable homography", m.id);
                continue;
            };
            for corner in self.board.marker_adjacent_corners(m.id) {
                let Some(xy) = self.board.corner_xy(corner) else {
                    continue;
                };
                let p = h.apply(xy);
                if !(p.x.is_finite() && p.y.is_finite()) {
                    continue;
                }
                let nearest = m
                    .corners
                    .iter()
                    .map(|c| ((c.x as f64 - p.x).powi(2) + (c.y as f64 - p.y).powi(2)).sqrt())
                    .fold(f64::INFINITY, f64::min);
                let e = predictions.entry(corner).or_insert_with(|| Prediction {
                    nearest_feature: f64::INFINITY,
                    ..Prediction::default()
                });
                e.sum += p.coords;
                e.count += 1;
                e.nearest_feature = e.nearest_feature.min(nearest);
            }
        }

        let mut out = Vec::with_capacity(predictions.len());
        for (id, pred) in predictions {
            let touching = self.board.corner_adjacent_markers(id).len();
            let required = self.params.min_adjacent_markers.min(touching).max(1);
            if pred.count < required {
                continue;
            }
            let guess = Point2::from(pred.sum / pred.count as f64);
            if !img.contains(guess.x, guess.y) {
                continue;
            }
            let refined = match &self.params.refine {
                Some(refine) => {
                    let limit = (0.5 * pred.nearest_feature).floor().max(1.0) as usize;
                    let params = SubPixParams {
                        half_window: refine.half_window.min(limit).max(1),
                        ..*refine
                    };
                    refine_corner_subpix(img, guess, &params)
                }
                None => guess,
            };
            out.push(CornerCorrespondence { id, image: refined });
        }
        out
    }

    fn marker_homography(&self, m: &DetectedMarker) -> Option<Homography> {
        let obj = self.board.marker_object_corners(m.id)?;
        let img = m.corners.map(|c| Point2::new(c.x as f64, c.y as f64));
        homography_from_4pt(&obj, &img)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CharucoBoardSpec;
    use charuco_calib_aruco::builtins::builtin_dictionary;
    use charuco_calib_core::GrayImage;
    use std::sync::Arc;

    fn board() -> CharucoBoard {
        CharucoBoard::new(
            CharucoBoardSpec {
                squares_x: 5,
                squares_y: 4,
                square_length: 20.0,
                marker_length: 14.0,
            },
            Arc::new(builtin_dictionary("4X4_50").unwrap()),
        )
        .unwrap()
    }

    /// Perfect detection under a scale + offset mapping board → image.
    fn marker(board: &CharucoBoard, id: u32, scale: f64, offset: f64) -> DetectedMarker {
        let c = board.marker_object_corners(id).unwrap();
        DetectedMarker {
            id,
            corners: c.map(|p| Point2::new((p.x * scale + offset) as f32, (p.y * scale + offset) as f32)),
            hamming: 0,
            border_score: 1.0,
        }
    }

    fn no_refine() -> CorrespondenceParams {
        CorrespondenceParams {
            refine: None,
            ..CorrespondenceParams::default()
        }
    }

    #[test]
    fn corners_need_both_adjacent_markers() {
        let b = board();
        let img = GrayImage::filled(200, 200, 255);
        // markers 0 (1,0) and 2 (0,1) both touch corner 0 at (1,1)
        let markers = vec![marker(&b, 0, 2.0, 10.0), marker(&b, 2, 2.0, 10.0)];
        let corners = CorrespondenceBuilder::new(&b, no_refine()).build(&img.view(), &markers);
        assert_eq!(corners.len(), 1);
        assert_eq!(corners[0].id, 0);
        assert!((corners[0].image.x - 50.0).abs() < 1e-6);
        assert!((corners[0].image.y - 50.0).abs() < 1e-6);

        let single = CorrespondenceBuilder::new(
            &b,
            CorrespondenceParams {
                min_adjacent_markers: 1,
                refine: None,
            },
        )
        .build(&img.view(), &markers[..1]);
        let ids: Vec<u32> = single.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn ignores_markers_outside_board_and_dedups() {
        let b = board();
        let img = GrayImage::filled(200, 200, 255);
        let mut markers: Vec<DetectedMarker> = (0..b.marker_count() as u32)
            .map(|id| marker(&b, id, 2.0, 10.0))
            .collect();
        let mut stray = markers[0].clone();
        stray.id = 40;
        markers.push(stray);

        let corners = CorrespondenceBuilder::new(&b, no_refine()).build(&img.view(), &markers);
        assert_eq!(corners.len(), b.corner_count());
        assert!(corners.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn corners_outside_image_are_dropped() {
        let b = board();
        let img = GrayImage::filled(60, 60, 255);
        let markers: Vec<DetectedMarker> = (0..b.marker_count() as u32)
            .map(|id| marker(&b, id, 2.0, 10.0))
            .collect();
        let corners = CorrespondenceBuilder::new(&b, no_refine()).build(&img.view(), &markers);
        assert!(corners.iter().all(|c| c.image.x <= 59.0 && c.image.y <= 59.0));
        assert_eq!(corners.len(), 1);
    }
}
