//! ChArUco board geometry.
//!
//! Board coordinates have their origin at the outer top-left corner of the
//! square grid, x to the right, y down, z = 0 on the board plane. The
//! top-left square is black; markers sit on the white squares (`(i + j)`
//! odd) with ids assigned in row-major order.

use charuco_calib_aruco::MarkerDictionary;
use charuco_calib_core::PlanarTarget;
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Static board geometry. Lengths share one physical unit (mm in configs).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CharucoBoardSpec {
    /// Number of squares along x.
    pub squares_x: u32,
    /// Number of squares along y.
    pub squares_y: u32,
    pub square_length: f64,
    pub marker_length: f64,
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CharucoBoardError {
    #[error("board needs at least 2x2 squares, got {squares_x}x{squares_y}")]
    InvalidSize { squares_x: u32, squares_y: u32 },
    #[error("square_length must be finite and > 0, got {0}")]
    InvalidSquareLength(f64),
    #[error("marker_length must be in (0, square_length), got {marker} for square {square}")]
    InvalidMarkerLength { marker: f64, square: f64 },
    #[error("dictionary {0} has no codes")]
    EmptyDictionary(String),
    #[error("board needs {needed} markers, dictionary has {available}")]
    NotEnoughDictionaryCodes { needed: usize, available: usize },
}

/// Validated, immutable board model.
#[derive(Clone, Debug)]
pub struct CharucoBoard {
    spec: CharucoBoardSpec,
    dictionary: Arc<dyn MarkerDictionary>,
    /// Square `(sx, sy)` of each marker id.
    marker_cells: Vec<[u32; 2]>,
    /// Marker id of each square, row-major.
    cell_markers: Vec<Option<u32>>,
}

impl CharucoBoard {
    /// Validate and create a board.
    pub fn new(
        spec: CharucoBoardSpec,
        dictionary: Arc<dyn MarkerDictionary>,
    ) -> Result<Self, CharucoBoardError> {
        if spec.squares_x < 2 || spec.squares_y < 2 {
            return Err(CharucoBoardError::InvalidSize {
                squares_x: spec.squares_x,
                squares_y: spec.squares_y,
            });
        }
        if !spec.square_length.is_finite() || spec.square_length <= 0.0 {
            return Err(CharucoBoardError::InvalidSquareLength(spec.square_length));
        }
        if !spec.marker_length.is_finite()
            || spec.marker_length <= 0.0
            || spec.marker_length >= spec.square_length
        {
            return Err(CharucoBoardError::InvalidMarkerLength {
                marker: spec.marker_length,
                square: spec.square_length,
            });
        }
        if dictionary.is_empty() {
            return Err(CharucoBoardError::EmptyDictionary(
                dictionary.name().to_string(),
            ));
        }

        let mut marker_cells = Vec::new();
        let mut cell_markers = vec![None; (spec.squares_x * spec.squares_y) as usize];
        for sy in 0..spec.squares_y {
            for sx in 0..spec.squares_x {
                // top-left square is black => white squares have (i+j) odd
                if (sx + sy) & 1 == 1 {
                    cell_markers[(sy * spec.squares_x + sx) as usize] =
                        Some(marker_cells.len() as u32);
                    marker_cells.push([sx, sy]);
                }
            }
        }

        let needed = marker_cells.len();
        let available = dictionary.len();
        if available < needed {
            return Err(CharucoBoardError::NotEnoughDictionaryCodes { needed, available });
        }

        Ok(Self {
            spec,
            dictionary,
            marker_cells,
            cell_markers,
        })
    }

    #[inline]
    pub fn spec(&self) -> CharucoBoardSpec {
        self.spec
    }

    pub fn dictionary(&self) -> &Arc<dyn MarkerDictionary> {
        &self.dictionary
    }

    /// Number of interior corners, `(squares_x - 1) * (squares_y - 1)`.
    #[inline]
    pub fn corner_count(&self) -> usize {
        ((self.spec.squares_x - 1) * (self.spec.squares_y - 1)) as usize
    }

    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_cells.len()
    }

    /// Physical board extent `[width, height]` of the square grid.
    pub fn extent(&self) -> [f64; 2] {
        [
            self.spec.squares_x as f64 * self.spec.square_length,
            self.spec.squares_y as f64 * self.spec.square_length,
        ]
    }

    /// Square `(sx, sy)` carrying the marker.
    #[inline]
    pub fn marker_cell(&self, marker_id: u32) -> Option<[u32; 2]> {
        self.marker_cells.get(marker_id as usize).copied()
    }

    /// Marker on square `(sx, sy)`, if any.
    pub fn marker_at(&self, sx: i64, sy: i64) -> Option<u32> {
        if sx < 0 || sy < 0 || sx >= self.spec.squares_x as i64 || sy >= self.spec.squares_y as i64
        {
            return None;
        }
        self.cell_markers[(sy * self.spec.squares_x as i64 + sx) as usize]
    }

    /// Marker corners on the board plane in marker order (TL, TR, BR, BL).
    pub fn marker_object_corners(&self, marker_id: u32) -> Option<[Point2<f64>; 4]> {
        let [sx, sy] = self.marker_cell(marker_id)?;
        let s = self.spec.square_length;
        let m = self.spec.marker_length;
        let x0 = sx as f64 * s + 0.5 * (s - m);
        let y0 = sy as f64 * s + 0.5 * (s - m);
        Some([
            Point2::new(x0, y0),
            Point2::new(x0 + m, y0),
            Point2::new(x0 + m, y0 + m),
            Point2::new(x0, y0 + m),
        ])
    }

    /// Corner id of the grid intersection `(ix, iy)`; only interior
    /// intersections (`1 <= ix < squares_x`, `1 <= iy < squares_y`) have ids.
    pub fn corner_id(&self, ix: i64, iy: i64) -> Option<u32> {
        let sx = self.spec.squares_x as i64;
        let sy = self.spec.squares_y as i64;
        if ix <= 0 || iy <= 0 || ix >= sx || iy >= sy {
            return None;
        }
        Some(((iy - 1) * (sx - 1) + (ix - 1)) as u32)
    }

    /// Grid intersection `(ix, iy)` of a corner id.
    pub fn corner_grid(&self, id: u32) -> Option<[u32; 2]> {
        if id as usize >= self.corner_count() {
            return None;
        }
        let cols = self.spec.squares_x - 1;
        Some([id % cols + 1, id / cols + 1])
    }

    /// Position of a corner on the board plane.
    pub fn corner_xy(&self, id: u32) -> Option<Point2<f64>> {
        let [ix, iy] = self.corner_grid(id)?;
        let s = self.spec.square_length;
        Some(Point2::new(ix as f64 * s, iy as f64 * s))
    }

    /// 3D position of a corner (`z = 0`).
    pub fn corner_object_point(&self, id: u32) -> Option<Point3<f64>> {
        self.corner_xy(id).map(|p| Point3::new(p.x, p.y, 0.0))
    }

    /// All corner positions, indexed by id.
    pub fn object_points(&self) -> Vec<Point3<f64>> {
        (0..self.corner_count() as u32)
            .filter_map(|id| self.corner_object_point(id))
            .collect()
    }

    /// Interior corners on the outline of the marker's square
    /// (TL, TR, BR, BL order, border corners omitted).
    pub fn marker_adjacent_corners(&self, marker_id: u32) -> Vec<u32> {
        let Some([sx, sy]) = self.marker_cell(marker_id) else {
            return Vec::new();
        };
        let (sx, sy) = (sx as i64, sy as i64);
        [(sx, sy), (sx + 1, sy), (sx + 1, sy + 1), (sx, sy + 1)]
            .into_iter()
            .filter_map(|(ix, iy)| self.corner_id(ix, iy))
            .collect()
    }

    /// Markers on the squares that touch a corner.
    pub fn corner_adjacent_markers(&self, corner_id: u32) -> Vec<u32> {
        let Some([ix, iy]) = self.corner_grid(corner_id) else {
            return Vec::new();
        };
        let (ix, iy) = (ix as i64, iy as i64);
        [(ix - 1, iy - 1), (ix, iy - 1), (ix - 1, iy), (ix, iy)]
            .into_iter()
            .filter_map(|(sx, sy)| self.marker_at(sx, sy))
            .collect()
    }
}

impl PlanarTarget for CharucoBoard {
    fn point_count(&self) -> usize {
        self.corner_count()
    }

    fn object_point(&self, id: u32) -> Option<Point3<f64>> {
        self.corner_object_point(id)
    }
}
