//! Frame selection for calibration.
//!
//! Consecutive frames of a capture are strongly correlated, so only every
//! `interval`-th marker-bearing frame is kept. The counter only advances on
//! frames that contain at least one marker; it is read before it advances,
//! so the first such frame is always eligible.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationParams {
    /// Keep one in `interval` marker-bearing frames (`0` behaves like `1`).
    pub interval: usize,
    /// Minimum interpolated corners for a frame to be usable.
    pub min_corners: usize,
}

impl Default for DecimationParams {
    fn default() -> Self {
        Self {
            interval: 2,
            min_corners: 6,
        }
    }
}

/// Outcome for one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum FrameVerdict {
    Accepted,
    /// No marker was detected; the counter did not advance.
    NoMarkers,
    /// Too few corners; the counter still advanced.
    InsufficientCorners { found: usize, required: usize },
    /// Enough corners, but the frame fell between decimation steps.
    Decimated,
}

impl FrameVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FrameVerdict::Accepted)
    }
}

/// Stateful filter; feed frames in capture order.
#[derive(Clone, Debug)]
pub struct DecimationFilter {
    params: DecimationParams,
    counter: usize,
}

impl DecimationFilter {
    pub fn new(params: DecimationParams) -> Self {
        Self { params, counter: 0 }
    }

    pub fn params(&self) -> DecimationParams {
        self.params
    }

    /// Marker-bearing frames seen so far.
    pub fn counter(&self) -> usize {
        self.counter
    }

    /// Classify the next frame from its marker and corner counts.
    pub fn admit(&mut self, markers: usize, corners: usize) -> FrameVerdict {
        if markers == 0 {
            return FrameVerdict::NoMarkers;
        }
        let slot = self.counter;
        self.counter += 1;

        if corners < self.params.min_corners {
            return FrameVerdict::InsufficientCorners {
                found: corners,
                required: self.params.min_corners,
            };
        }
        if slot % self.params.interval.max(1) != 0 {
            return FrameVerdict::Decimated;
        }
        FrameVerdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepted(params: DecimationParams, frames: &[(usize, usize)]) -> usize {
        let mut f = DecimationFilter::new(params);
        frames
            .iter()
            .filter(|&&(m, c)| f.admit(m, c).is_accepted())
            .count()
    }

    #[test]
    fn fifteen_frames_interval_two_keep_eight() {
        let frames = vec![(10, 24); 15];
        assert_eq!(accepted(DecimationParams::default(), &frames), 8);
    }

    #[test]
    fn interval_one_keeps_everything() {
        let frames = vec![(3, 7); 9];
        let params = DecimationParams {
            interval: 1,
            ..DecimationParams::default()
        };
        assert_eq!(accepted(params, &frames), 9);
    }

    #[test]
    fn markerless_frames_do_not_advance_counter() {
        let mut f = DecimationFilter::new(DecimationParams::default());
        assert_eq!(f.admit(0, 0), FrameVerdict::NoMarkers);
        assert_eq!(f.counter(), 0);
        assert_eq!(f.admit(4, 12), FrameVerdict::Accepted);
        assert_eq!(f.admit(0, 0), FrameVerdict::NoMarkers);
        assert_eq!(f.admit(4, 12), FrameVerdict::Decimated);
        assert_eq!(f.admit(4, 12), FrameVerdict::Accepted);
    }

    #[test]
    fn corner_poor_frames_still_advance_counter() {
        let mut f = DecimationFilter::new(DecimationParams::default());
        assert_eq!(
            f.admit(2, 5),
            FrameVerdict::InsufficientCorners {
                found: 5,
                required: 6
            }
        );
        assert_eq!(f.counter(), 1);
        // slot 1 is odd: decimated even though it is corner-rich
        assert_eq!(f.admit(2, 6), FrameVerdict::Decimated);
        assert_eq!(f.admit(2, 6), FrameVerdict::Accepted);
    }

    #[test]
    fn retained_count_is_ceiling_of_ratio() {
        for n in 0..20usize {
            for k in 1..5usize {
                let frames = vec![(1, 10); n];
                let params = DecimationParams {
                    interval: k,
                    min_corners: 6,
                };
                assert_eq!(accepted(params, &frames), n.div_ceil(k), "n={n} k={k}");
            }
        }
    }
}
