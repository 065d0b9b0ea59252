//! Embedded built-in dictionaries.
//!
//! `DICT_4X4_50` and `DICT_4X4_100` are the standard ArUco tables, so boards
//! printed by other ArUco tooling decode here and vice versa. The published
//! tables store white cells as 1; they are inverted on load to this crate's
//! black = 1 convention. The 50-marker table is the prefix of the
//! 100-marker one.

#![allow(clippy::unreadable_literal)]

use crate::dictionary::code_mask;
use crate::matcher::{rotation_distance, self_rotation_distance};
use crate::Dictionary;

/// Standard 4×4 codes, bit `y * 4 + x` set for a white cell.
#[rustfmt::skip]
const ARUCO_4X4_WHITE: [u16; 100] = [
    0x4cad, 0x59f0, 0xb4cc, 0x6299, 0x792a, 0xb39e, 0x7479, 0x4f23, 0x5b7f, 0x6af3,
    0x899f, 0xe588, 0xed70, 0xf054, 0x8d24, 0x7c64, 0xa662, 0x0066, 0x7a36, 0xf56e,
    0xd161, 0xd40d, 0xab33, 0x41bb, 0xe27f, 0x8e29, 0x2735, 0x2aa5, 0xc484, 0xf62c,
    0xa822, 0x4dea, 0xf379, 0xd30f, 0x7510, 0x9490, 0xae18, 0xff20, 0x6fb0, 0x5a38,
    0x18e8, 0x1454, 0x314c, 0x4d1c, 0x1724, 0xd774, 0xfcb4, 0x26d2, 0x740a, 0xc80a,
    0x298a, 0x16aa, 0x82ba, 0xe9fa, 0x8016, 0xe616, 0x2486, 0x9786, 0x48d6, 0xa7f6,
    0xfbe6, 0xd87e, 0x0501, 0x22c1, 0x45d1, 0x5ec9, 0x3621, 0x54a1, 0x39a1, 0x9139,
    0x85f9, 0x3edd, 0x203d, 0xda6d, 0x13fd, 0xd5ed, 0xf853, 0x4693, 0x1a9b, 0xabcb,
    0x1933, 0x05e3, 0xeca3, 0xba97, 0xa49f, 0xdddf, 0x5477, 0xb2ef, 0xaeac, 0xb551,
    0xe86e, 0xf350, 0xd260, 0x83b4, 0x1b92, 0x2fc2, 0x6cf2, 0xcbf2, 0x2796, 0xe30e,
];

/// `(dict_ID, name, marker size, markers, correctable bits)`.
const BUILTINS: [(u32, &str, usize, usize, u8); 2] = [
    (0, "4X4_50", 4, 50, 1),
    (1, "4X4_100", 4, 100, 1),
];

fn build(name: &str, n: usize, len: usize, correction: u8) -> Option<Dictionary> {
    let mask = code_mask(n * n);
    let codes = ARUCO_4X4_WHITE[..len].iter().map(|&c| !u64::from(c) & mask).collect();
    Dictionary::new(name, n, correction, codes).ok()
}

/// Built-in dictionary by name, e.g. `"4X4_50"` (an optional `DICT_`
/// prefix is accepted).
pub fn builtin_dictionary(name: &str) -> Option<Dictionary> {
    let name = name.strip_prefix("DICT_").unwrap_or(name);
    let &(_, name, n, len, correction) = BUILTINS.iter().find(|b| b.1.eq_ignore_ascii_case(name))?;
    build(name, n, len, correction)
}

/// Dictionary by numeric id in the predefined ArUco numbering.
///
/// Only ids with an embedded table resolve: `0` (`DICT_4X4_50`) and `1`
/// (`DICT_4X4_100`).
pub fn predefined_dictionary(dict_id: u32) -> Option<Dictionary> {
    let &(_, name, n, len, correction) = BUILTINS.iter().find(|b| b.0 == dict_id)?;
    build(name, n, len, correction)
}

/// Names of all built-in dictionaries.
pub fn builtin_names() -> Vec<String> {
    BUILTINS.iter().map(|b| b.1.to_string()).collect()
}

/// Minimum rotation-aware distance of a code list.
pub fn min_pairwise_distance(codes: &[u64], n: usize) -> u32 {
    let mut best = u32::MAX;
    for (i, &a) in codes.iter().enumerate() {
        best = best.min(self_rotation_distance(a, n));
        for &b in &codes[i + 1..] {
            best = best.min(rotation_distance(a, b, n));
        }
    }
    best
}
