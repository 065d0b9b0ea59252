//! ArUco-style square marker detection.
//!
//! - [`MarkerDictionary`] abstracts a marker code table; [`builtins`] embeds
//!   the standard `DICT_4X4_50` and `DICT_4X4_100` tables.
//! - [`Matcher`] matches observed codes against a dictionary under all
//!   four rotations.
//! - [`MarkerDetector`] finds dark convex quads with an adaptive threshold,
//!   decodes them and refines their corners with [`refine_corner_subpix`].

pub mod builtins;
mod contour;
mod decode;
mod detector;
mod dictionary;
mod matcher;
mod subpix;
mod threshold;

pub use decode::{decode_quad, DecodeParams, MarkerObservation};
pub use detector::{
    DetectedMarker, MarkerDetectionResult, MarkerDetector, MarkerDetectorError,
    MarkerDetectorParams,
};
pub use dictionary::{Dictionary, DictionaryError, MarkerDictionary};
pub use matcher::{rotate_code_u64, rotation_distance, self_rotation_distance, Match, Matcher};
pub use subpix::{refine_corner_subpix, refine_corners_subpix, SubPixParams};
