//! Code lookup with rotation disambiguation.

use crate::MarkerDictionary;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Match {
    pub id: u32,
    /// Clockwise quarter turns with `observed == rotate(code(id), rotation)`.
    pub rotation: u8,
    /// Bit errors against the rotated dictionary code.
    pub hamming: u8,
}

/// Exhaustive search over every id and all four rotations, precomputed.
#[derive(Clone, Debug)]
pub struct Matcher {
    marker_size: usize,
    max_hamming: u8,
    rotated: Vec<[u64; 4]>,
}

impl Matcher {
    /// `None` when a marker needs more than 64 bits.
    pub fn new(dict: &dyn MarkerDictionary, max_hamming: u8) -> Option<Self> {
        let n = dict.marker_size();
        if n == 0 || n * n > 64 {
            return None;
        }

        let rotated = (0..dict.len() as u32)
            .filter_map(|id| dict.code(id))
            .map(|base| [0u8, 1, 2, 3].map(|r| rotate_code_u64(base, n, r)))
            .collect();

        Some(Self {
            marker_size: n,
            max_hamming,
            rotated,
        })
    }

    #[inline]
    pub fn marker_size(&self) -> usize {
        self.marker_size
    }

    #[inline]
    pub fn max_hamming(&self) -> u8 {
        self.max_hamming
    }

    /// Closest (id, rotation) within `max_hamming`; ties keep the lowest id
    /// and rotation.
    pub fn match_code(&self, observed: u64) -> Option<Match> {
        self.rotated
            .iter()
            .enumerate()
            .flat_map(|(id, rots)| {
                rots.iter().enumerate().map(move |(rotation, &cand)| Match {
                    id: id as u32,
                    rotation: rotation as u8,
                    hamming: (observed ^ cand).count_ones() as u8,
                })
            })
            .filter(|m| m.hamming <= self.max_hamming)
            .min_by_key(|m| m.hamming)
    }
}

/// Rotate a row-major code (`idx = y * n + x`) clockwise by `rot` quarter turns.
pub fn rotate_code_u64(code: u64, n: usize, rot: u8) -> u64 {
    let rot = rot & 3;
    if rot == 0 {
        return code;
    }

    let mut out = 0u64;
    for y in 0..n {
        for x in 0..n {
            let (sx, sy) = match rot {
                1 => (y, n - 1 - x),
                2 => (n - 1 - x, n - 1 - y),
                _ => (n - 1 - y, x),
            };
            out |= ((code >> (sy * n + sx)) & 1) << (y * n + x);
        }
    }
    out
}

/// Smallest Hamming distance between `a` and any rotation of `b`.
pub fn rotation_distance(a: u64, b: u64, n: usize) -> u32 {
    (0..4)
        .map(|r| (a ^ rotate_code_u64(b, n, r)).count_ones())
        .min()
        .unwrap_or(0)
}

/// Smallest Hamming distance between `code` and its own non-trivial rotations.
pub fn self_rotation_distance(code: u64, n: usize) -> u32 {
    (1..4)
        .map(|r| (code ^ rotate_code_u64(code, n, r)).count_ones())
        .min()
        .unwrap_or(0)
}
