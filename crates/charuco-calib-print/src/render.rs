//! Board rasterization.

use charuco_calib_charuco::{BoardConfig, CharucoBoard};
use charuco_calib_core::GrayImage;
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::PrintError;

const BLACK: u8 = 0;
const WHITE: u8 = 255;

/// Marker border width in bit cells.
pub const MARKER_BORDER_BITS: usize = 1;

/// Intensity of the board at a point in board coordinates.
///
/// Points off the square grid read as white paper.
pub fn board_intensity(board: &CharucoBoard, p: Point2<f64>) -> u8 {
    let spec = board.spec();
    let s = spec.square_length;
    let [w, h] = board.extent();
    if !(p.x >= 0.0 && p.y >= 0.0 && p.x < w && p.y < h) {
        return WHITE;
    }
    let sx = (p.x / s).floor() as i64;
    let sy = (p.y / s).floor() as i64;
    let Some(id) = board.marker_at(sx, sy) else {
        return BLACK;
    };
    let Some(corners) = board.marker_object_corners(id) else {
        return WHITE;
    };
    let tl = corners[0];
    let m = spec.marker_length;
    let (u, v) = ((p.x - tl.x) / m, (p.y - tl.y) / m);
    if !(0.0..1.0).contains(&u) || !(0.0..1.0).contains(&v) {
        return WHITE;
    }

    let dict = board.dictionary();
    let n = dict.marker_size();
    let cells = n + 2 * MARKER_BORDER_BITS;
    let cx = ((u * cells as f64) as usize).min(cells - 1);
    let cy = ((v * cells as f64) as usize).min(cells - 1);
    let b = MARKER_BORDER_BITS;
    if cx < b || cy < b || cx >= cells - b || cy >= cells - b {
        return BLACK;
    }
    let bit = (cy - b) * n + (cx - b);
    match dict.code(id) {
        Some(code) if (code >> bit) & 1 == 1 => BLACK,
        _ => WHITE,
    }
}

/// Raster placement parameters.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderParams {
    /// Pixels per board unit.
    pub px_per_unit: f64,
    /// White border around the grid, in pixels.
    pub margin_px: usize,
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            px_per_unit: 10.0,
            margin_px: 0,
        }
    }
}

/// A rendered board and its placement on the raster.
#[derive(Clone, Debug)]
pub struct BoardRaster {
    pub image: GrayImage,
    /// Pixels per board unit.
    pub px_per_unit: f64,
    /// Raster position (pixel-centre convention) of the board origin.
    pub origin: [f64; 2],
}

impl BoardRaster {
    /// Board coordinates → raster coordinates (pixel `(x, y)` is centred on `(x, y)`).
    pub fn board_to_pixel(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            self.origin[0] + p.x * self.px_per_unit,
            self.origin[1] + p.y * self.px_per_unit,
        )
    }

    pub fn pixel_to_board(&self, p: Point2<f64>) -> Point2<f64> {
        Point2::new(
            (p.x - self.origin[0]) / self.px_per_unit,
            (p.y - self.origin[1]) / self.px_per_unit,
        )
    }
}

fn rasterize(
    board: &CharucoBoard,
    width: usize,
    height: usize,
    px_per_unit: f64,
    origin: [f64; 2],
) -> BoardRaster {
    let mut raster = BoardRaster {
        image: GrayImage::filled(width, height, WHITE),
        px_per_unit,
        origin,
    };
    for y in 0..height {
        for x in 0..width {
            let b = raster.pixel_to_board(Point2::new(x as f64, y as f64));
            let v = board_intensity(board, b);
            raster.image.data[y * width + x] = v;
        }
    }
    raster
}

/// Render the board grid with a uniform white margin.
pub fn render_board(board: &CharucoBoard, params: &RenderParams) -> Result<BoardRaster, PrintError> {
    if !params.px_per_unit.is_finite() || params.px_per_unit <= 0.0 {
        return Err(PrintError::InvalidResolution(params.px_per_unit));
    }
    let [w, h] = board.extent();
    let m = params.margin_px;
    let width = (w * params.px_per_unit).round() as usize + 2 * m;
    let height = (h * params.px_per_unit).round() as usize + 2 * m;
    // pixel x covers [x - 0.5, x + 0.5); the grid starts at the margin edge
    let origin = [m as f64 - 0.5, m as f64 - 0.5];
    Ok(rasterize(board, width, height, params.px_per_unit, origin))
}

/// Render a printable page of `board_size_x × board_size_y` (mm) at
/// `pixels_per_mm`, fitting the grid inside the configured margins.
///
/// The grid keeps its aspect ratio and is centred. When the page cannot
/// hold the grid at its physical size, the grid is scaled down and a
/// warning is logged: printed squares will then not match `square_length`.
pub fn render_board_page(
    board: &CharucoBoard,
    config: &BoardConfig,
    pixels_per_mm: f64,
) -> Result<BoardRaster, PrintError> {
    if !pixels_per_mm.is_finite() || pixels_per_mm <= 0.0 {
        return Err(PrintError::InvalidResolution(pixels_per_mm));
    }
    let page_w = (config.board_size_x * pixels_per_mm).round();
    let page_h = (config.board_size_y * pixels_per_mm).round();
    let avail_w = page_w - 2.0 * config.margin_lr * pixels_per_mm;
    let avail_h = page_h - 2.0 * config.margin_tb * pixels_per_mm;
    if avail_w <= 0.0 || avail_h <= 0.0 {
        return Err(PrintError::PageTooSmall {
            width: config.board_size_x,
            height: config.board_size_y,
        });
    }

    let [w, h] = board.extent();
    let fit = (avail_w / w).min(avail_h / h);
    let ppu = fit.min(pixels_per_mm);
    if ppu < pixels_per_mm {
        log::warn!(
            "board ({w} x {h}) does not fit the page inside the margins; scaled to {:.1}% of its physical size",
            100.0 * ppu / pixels_per_mm
        );
    }
    let origin = [
        0.5 * (page_w - w * ppu) - 0.5,
        0.5 * (page_h - h * ppu) - 0.5,
    ];
    Ok(rasterize(board, page_w as usize, page_h as usize, ppu, origin))
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_calib_aruco::builtins::builtin_dictionary;
    use charuco_calib_aruco::{decode_quad, DecodeParams, Matcher};
    use charuco_calib_charuco::CharucoBoardSpec;
    use std::sync::Arc;

    fn board() -> CharucoBoard {
        CharucoBoard::new(
            CharucoBoardSpec {
                squares_x: 5,
                squares_y: 4,
                square_length: 30.0,
                marker_length: 22.0,
            },
            Arc::new(builtin_dictionary("4X4_50").unwrap()),
        )
        .unwrap()
    }

    #[test]
    fn top_left_square_is_black() {
        let b = board();
        assert_eq!(board_intensity(&b, Point2::new(5.0, 5.0)), BLACK);
        // white margin inside a marker square
        assert_eq!(board_intensity(&b, Point2::new(31.0, 1.0)), WHITE);
        // marker border just inside the marker
        assert_eq!(board_intensity(&b, Point2::new(34.5, 4.5)), BLACK);
        assert_eq!(board_intensity(&b, Point2::new(-1.0, 5.0)), WHITE);
    }

    #[test]
    fn rendered_markers_decode() {
        let b = board();
        let raster = render_board(&b, &RenderParams { px_per_unit: 4.0, margin_px: 10 }).unwrap();
        assert_eq!(raster.image.width, 5 * 120 + 20);
        let matcher = Matcher::new(b.dictionary().as_ref(), 0).unwrap();
        for id in 0..b.marker_count() as u32 {
            let obj = b.marker_object_corners(id).unwrap();
            let quad = obj.map(|p| {
                let q = raster.board_to_pixel(p);
                // outer edge of the marker in pixel-centre convention
                Point2::new(q.x as f32, q.y as f32)
            });
            let (m, _) = decode_quad(&raster.image.view(), &quad, &DecodeParams::default(), &matcher)
                .expect("decodes");
            assert_eq!((m.id, m.rotation), (id, 0));
        }
    }

    #[test]
    fn page_rendering_centres_and_scales() {
        let b = board();
        let cfg = BoardConfig {
            dict_id: 0,
            square_length: 30.0,
            marker_length: 22.0,
            margin_tb: 10.0,
            margin_lr: 10.0,
            num_squares_x: 5,
            num_squares_y: 4,
            board_size_x: 297.0,
            board_size_y: 210.0,
        };
        let raster = render_board_page(&b, &cfg, 2.0).unwrap();
        assert_eq!((raster.image.width, raster.image.height), (594, 420));
        // the grid (150 x 120 mm) fits: physical scale preserved
        assert_eq!(raster.px_per_unit, 2.0);
        let centre = raster.board_to_pixel(Point2::new(75.0, 60.0));
        assert!((centre.x - 296.5).abs() < 1e-9 && (centre.y - 209.5).abs() < 1e-9);

        let tiny = BoardConfig {
            board_size_x: 100.0,
            board_size_y: 100.0,
            ..cfg
        };
        let raster = render_board_page(&b, &tiny, 2.0).unwrap();
        assert!(raster.px_per_unit < 2.0);

        let impossible = BoardConfig {
            margin_lr: 60.0,
            board_size_x: 100.0,
            ..cfg
        };
        assert!(matches!(
            render_board_page(&b, &impossible, 2.0),
            Err(PrintError::PageTooSmall { .. })
        ));
    }
}
