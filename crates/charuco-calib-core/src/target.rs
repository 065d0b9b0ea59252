//! Calibration observations: planar targets and per-image correspondences.

use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A planar calibration target with numbered reference points on `Z = 0`.
pub trait PlanarTarget {
    /// Number of reference points; valid ids are `0..point_count()`.
    fn point_count(&self) -> usize;

    /// Physical position of the point with the given id.
    fn object_point(&self, id: u32) -> Option<Point3<f64>>;
}

/// One detected board corner: its id and sub-pixel image position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CornerCorrespondence {
    pub id: u32,
    pub image: Point2<f64>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SampleError {
    #[error("corner id {id} is not part of the target")]
    UnknownId { id: u32 },
    #[error("corner id {id} appears more than once")]
    DuplicateId { id: u32 },
    #[error("corner id {id} has a non-finite image position")]
    NonFinite { id: u32 },
}

/// Correspondences from one accepted image.
///
/// Ids are unique, known to the target, and sorted ascending.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    label: String,
    image_size: [u32; 2],
    correspondences: Vec<CornerCorrespondence>,
}

impl CalibrationSample {
    pub fn new(
        label: impl Into<String>,
        image_size: [u32; 2],
        mut correspondences: Vec<CornerCorrespondence>,
        target: &dyn PlanarTarget,
    ) -> Result<Self, SampleError> {
        let mut seen = HashSet::with_capacity(correspondences.len());
        for c in &correspondences {
            if target.object_point(c.id).is_none() {
                return Err(SampleError::UnknownId { id: c.id });
            }
            if !seen.insert(c.id) {
                return Err(SampleError::DuplicateId { id: c.id });
            }
            if !(c.image.x.is_finite() && c.image.y.is_finite()) {
                return Err(SampleError::NonFinite { id: c.id });
            }
        }
        correspondences.sort_by_key(|c| c.id);
        Ok(Self {
            label: label.into(),
            image_size,
            correspondences,
        })
    }

    /// Name of the source image (path or index).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn image_size(&self) -> [u32; 2] {
        self.image_size
    }

    pub fn correspondences(&self) -> &[CornerCorrespondence] {
        &self.correspondences
    }

    pub fn len(&self) -> usize {
        self.correspondences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.correspondences.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Line(usize);

    impl PlanarTarget for Line {
        fn point_count(&self) -> usize {
            self.0
        }

        fn object_point(&self, id: u32) -> Option<Point3<f64>> {
            ((id as usize) < self.0).then(|| Point3::new(id as f64, 0.0, 0.0))
        }
    }

    fn corr(id: u32) -> CornerCorrespondence {
        CornerCorrespondence {
            id,
            image: Point2::new(id as f64, 1.0),
        }
    }

    #[test]
    fn sample_sorts_and_validates_ids() {
        let s = CalibrationSample::new("a", [10, 10], vec![corr(3), corr(1)], &Line(4)).unwrap();
        let ids: Vec<u32> = s.correspondences().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(
            CalibrationSample::new("a", [10, 10], vec![corr(1), corr(1)], &Line(4)),
            Err(SampleError::DuplicateId { id: 1 })
        );
        assert_eq!(
            CalibrationSample::new("a", [10, 10], vec![corr(9)], &Line(4)),
            Err(SampleError::UnknownId { id: 9 })
        );
    }
}
