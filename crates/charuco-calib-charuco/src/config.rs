//! Board configuration table.
//!
//! The table is a two-column `key,value` CSV, optionally preceded by a
//! header row:
//!
//! ```text
//! ,value
//! dict_ID,0
//! square_length,30
//! marker_length,22
//! margin_tb,10
//! margin_lr,10
//! num_squares_x,7
//! num_squares_y,5
//! board_size_x,297
//! board_size_y,210
//! ```
//!
//! Lengths are in millimetres. The same structure can be stored as JSON.

use crate::{CharucoBoard, CharucoBoardError, CharucoBoardSpec};
use charuco_calib_aruco::builtins::predefined_dictionary;
use charuco_calib_aruco::{Dictionary, MarkerDictionary};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum BoardConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("board configuration is missing key `{0}`")]
    MissingKey(&'static str),
    #[error("invalid value `{value}` for key `{key}`")]
    InvalidValue { key: String, value: String },
    #[error("unsupported dictionary id {0} (embedded: 0 = DICT_4X4_50, 1 = DICT_4X4_100)")]
    UnknownDictionary(u32),
    #[error(transparent)]
    Board(#[from] CharucoBoardError),
}

/// Physical board and page description.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    /// Predefined dictionary id (see [`predefined_dictionary`]).
    #[serde(rename = "dict_ID")]
    pub dict_id: u32,
    pub square_length: f64,
    pub marker_length: f64,
    /// Top/bottom page margin.
    pub margin_tb: f64,
    /// Left/right page margin.
    pub margin_lr: f64,
    pub num_squares_x: u32,
    pub num_squares_y: u32,
    /// Page width.
    pub board_size_x: f64,
    /// Page height.
    pub board_size_y: f64,
}

const KEYS: [&str; 9] = [
    "dict_ID",
    "square_length",
    "marker_length",
    "margin_tb",
    "margin_lr",
    "num_squares_x",
    "num_squares_y",
    "board_size_x",
    "board_size_y",
];

impl BoardConfig {
    /// Parse the key/value table.
    ///
    /// Unknown keys are ignored; the first row is skipped when its value
    /// column is not numeric (a header).
    pub fn from_table_str(text: &str) -> Result<Self, BoardConfigError> {
        let mut values: [Option<String>; 9] = Default::default();

        for (row, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut cols = line.splitn(2, [',', ';', '\t']);
            let key = cols.next().unwrap_or_default().trim().trim_matches('"');
            let value = cols.next().unwrap_or_default().trim().trim_matches('"');
            let Some(slot) = KEYS.iter().position(|k| k.eq_ignore_ascii_case(key)) else {
                if row == 0 || key.is_empty() {
                    continue;
                }
                log::debug!("ignoring unknown board config key `{key}`");
                continue;
            };
            values[slot] = Some(value.to_string());
        }

        let float = |i: usize| -> Result<f64, BoardConfigError> {
            let raw = values[i].as_deref().ok_or(BoardConfigError::MissingKey(KEYS[i]))?;
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| BoardConfigError::InvalidValue {
                    key: KEYS[i].to_string(),
                    value: raw.to_string(),
                })
        };
        let integer = |i: usize| -> Result<u32, BoardConfigError> {
            let v = float(i)?;
            if v < 0.0 || v.fract() != 0.0 || v > u32::MAX as f64 {
                return Err(BoardConfigError::InvalidValue {
                    key: KEYS[i].to_string(),
                    value: values[i].clone().unwrap_or_default(),
                });
            }
            Ok(v as u32)
        };

        Ok(Self {
            dict_id: integer(0)?,
            square_length: float(1)?,
            marker_length: float(2)?,
            margin_tb: float(3)?,
            margin_lr: float(4)?,
            num_squares_x: integer(5)?,
            num_squares_y: integer(6)?,
            board_size_x: float(7)?,
            board_size_y: float(8)?,
        })
    }

    /// Render as a key/value table readable by [`BoardConfig::from_table_str`].
    pub fn to_table_string(&self) -> String {
        let mut out = String::from(",value\n");
        let values = [
            self.dict_id as f64,
            self.square_length,
            self.marker_length,
            self.margin_tb,
            self.margin_lr,
            self.num_squares_x as f64,
            self.num_squares_y as f64,
            self.board_size_x,
            self.board_size_y,
        ];
        for (k, v) in KEYS.iter().zip(values) {
            let _ = writeln!(out, "{k},{v}");
        }
        out
    }

    /// Load a key/value table from disk.
    pub fn load_table(path: impl AsRef<Path>) -> Result<Self, BoardConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| BoardConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_table_str(&text)
    }

    /// Load either format, choosing JSON for `.json` files.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BoardConfigError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::load_json(path),
            _ => Self::load_table(path),
        }
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, BoardConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| BoardConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), BoardConfigError> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| BoardConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Board geometry of this configuration.
    pub fn spec(&self) -> CharucoBoardSpec {
        CharucoBoardSpec {
            squares_x: self.num_squares_x,
            squares_y: self.num_squares_y,
            square_length: self.square_length,
            marker_length: self.marker_length,
        }
    }

    pub fn dictionary(&self) -> Result<Dictionary, BoardConfigError> {
        predefined_dictionary(self.dict_id).ok_or(BoardConfigError::UnknownDictionary(self.dict_id))
    }

    /// Build a validated board.
    pub fn build_board(&self) -> Result<CharucoBoard, BoardConfigError> {
        let dict: Arc<dyn MarkerDictionary> = Arc::new(self.dictionary()?);
        Ok(CharucoBoard::new(self.spec(), dict)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = ",value\n\
        dict_ID,1\n\
        square_length,30\n\
        marker_length,22.5\n\
        margin_tb,10\n\
        margin_lr,12\n\
        num_squares_x,7\n\
        num_squares_y,5.0\n\
        board_size_x,297\n\
        board_size_y,210\n";

    #[test]
    fn parses_table_with_header() {
        let cfg = BoardConfig::from_table_str(TABLE).unwrap();
        assert_eq!(cfg.dict_id, 1);
        assert_eq!(cfg.marker_length, 22.5);
        assert_eq!(cfg.num_squares_y, 5);
        let board = cfg.build_board().unwrap();
        assert_eq!(board.corner_count(), 24);
        assert_eq!(board.dictionary().name(), "4X4_100");
    }

    #[test]
    fn missing_key_is_reported() {
        let text = TABLE.replace("marker_length,22.5\n", "");
        assert!(matches!(
            BoardConfig::from_table_str(&text),
            Err(BoardConfigError::MissingKey("marker_length"))
        ));
    }

    #[test]
    fn invalid_values_are_reported() {
        let text = TABLE.replace("num_squares_x,7", "num_squares_x,7.5");
        assert!(matches!(
            BoardConfig::from_table_str(&text),
            Err(BoardConfigError::InvalidValue { .. })
        ));
        let text = TABLE.replace("dict_ID,1", "dict_ID,5");
        let cfg = BoardConfig::from_table_str(&text).unwrap();
        assert!(matches!(
            cfg.build_board(),
            Err(BoardConfigError::UnknownDictionary(5))
        ));
    }

    #[test]
    fn table_and_json_round_trip() {
        let cfg = BoardConfig::from_table_str(TABLE).unwrap();
        assert_eq!(BoardConfig::from_table_str(&cfg.to_table_string()).unwrap(), cfg);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("board.json");
        cfg.write_json(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"dict_ID\""));
        assert_eq!(BoardConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = BoardConfig::load("/definitely/not/here.csv").unwrap_err();
        assert!(matches!(err, BoardConfigError::Io { .. }));
    }
}
