//! Dictionary capability and the owned dictionary type.

use std::fmt;

/// Read access to a marker dictionary.
///
/// Codes hold the inner `marker_size × marker_size` bits in row-major
/// order with **black = 1** (bit `y * marker_size + x`).
pub trait MarkerDictionary: fmt::Debug + Send + Sync {
    /// Human-readable name (for logging).
    fn name(&self) -> &str;
    /// Inner bits per marker side.
    fn marker_size(&self) -> usize;
    /// Number of markers.
    fn len(&self) -> usize;
    /// Code of marker `id`.
    fn code(&self, id: u32) -> Option<u64>;
    /// Bit errors the dictionary can correct unambiguously.
    fn max_correction_bits(&self) -> u8;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of inner bits per marker.
    fn bit_count(&self) -> usize {
        self.marker_size() * self.marker_size()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DictionaryError {
    #[error("marker size {0} needs more than 64 bits")]
    MarkerTooLarge(usize),
    #[error("marker size must be positive")]
    EmptyMarker,
    #[error("code {index} has bits outside the {bits}-bit marker")]
    CodeOutOfRange { index: usize, bits: usize },
}

/// An owned list of marker codes.
#[derive(Clone, PartialEq, Eq)]
pub struct Dictionary {
    name: String,
    marker_size: usize,
    max_correction_bits: u8,
    codes: Vec<u64>,
}

impl Dictionary {
    pub fn new(
        name: impl Into<String>,
        marker_size: usize,
        max_correction_bits: u8,
        codes: Vec<u64>,
    ) -> Result<Self, DictionaryError> {
        if marker_size == 0 {
            return Err(DictionaryError::EmptyMarker);
        }
        let bits = marker_size * marker_size;
        if bits > 64 {
            return Err(DictionaryError::MarkerTooLarge(marker_size));
        }
        let mask = code_mask(bits);
        if let Some(index) = codes.iter().position(|&c| c & !mask != 0) {
            return Err(DictionaryError::CodeOutOfRange { index, bits });
        }
        Ok(Self {
            name: name.into(),
            marker_size,
            max_correction_bits,
            codes,
        })
    }

    pub fn codes(&self) -> &[u64] {
        &self.codes
    }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("name", &self.name)
            .field("marker_size", &self.marker_size)
            .field("max_correction_bits", &self.max_correction_bits)
            .field("len", &self.codes.len())
            .finish()
    }
}

impl MarkerDictionary for Dictionary {
    fn name(&self) -> &str {
        &self.name
    }

    fn marker_size(&self) -> usize {
        self.marker_size
    }

    fn len(&self) -> usize {
        self.codes.len()
    }

    fn code(&self, id: u32) -> Option<u64> {
        self.codes.get(id as usize).copied()
    }

    fn max_correction_bits(&self) -> u8 {
        self.max_correction_bits
    }
}

#[inline]
pub(crate) fn code_mask(bits: usize) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_codes_wider_than_marker() {
        assert_eq!(
            Dictionary::new("x", 2, 0, vec![0b1111, 0b1_0000]),
            Err(DictionaryError::CodeOutOfRange { index: 1, bits: 4 })
        );
        assert_eq!(
            Dictionary::new("x", 9, 0, vec![]),
            Err(DictionaryError::MarkerTooLarge(9))
        );
    }

    #[test]
    fn trait_accessors() {
        let d = Dictionary::new("tiny", 2, 0, vec![0b0110, 0b1000]).unwrap();
        let d: &dyn MarkerDictionary = &d;
        assert_eq!(d.len(), 2);
        assert_eq!(d.bit_count(), 4);
        assert_eq!(d.code(1), Some(0b1000));
        assert_eq!(d.code(2), None);
    }
}
