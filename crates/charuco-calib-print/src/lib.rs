//! Printable ChArUco boards.
//!
//! [`render_board_page`] lays a board out on a physical page (the board
//! configuration's `board_size_x/y` in millimetres) and [`write_png`]
//! stores it as 8-bit grayscale with the print resolution embedded.
//! [`board_intensity`] exposes the ideal board pattern for synthetic
//! rendering.

mod render;

use charuco_calib_core::GrayImage;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub use render::{
    board_intensity, render_board, render_board_page, BoardRaster, RenderParams,
    MARKER_BORDER_BITS,
};

#[derive(thiserror::Error, Debug)]
pub enum PrintError {
    #[error("resolution must be finite and > 0, got {0}")]
    InvalidResolution(f64),
    #[error("page {width} x {height} leaves no room inside the margins")]
    PageTooSmall { width: f64, height: f64 },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Png(#[from] png::EncodingError),
}

/// Write a grayscale image as PNG; `pixels_per_mm` is stored as the pHYs
/// resolution when given.
pub fn write_png(
    image: &GrayImage,
    path: impl AsRef<Path>,
    pixels_per_mm: Option<f64>,
) -> Result<(), PrintError> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|source| PrintError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut encoder = png::Encoder::new(
        BufWriter::new(file),
        image.width as u32,
        image.height as u32,
    );
    encoder.set_color(png::ColorType::Grayscale);
    encoder.set_depth(png::BitDepth::Eight);
    if let Some(ppmm) = pixels_per_mm.filter(|v| v.is_finite() && *v > 0.0) {
        let ppm = (ppmm * 1000.0).round() as u32;
        encoder.set_pixel_dims(Some(png::PixelDimensions {
            xppu: ppm,
            yppu: ppm,
            unit: png::Unit::Meter,
        }));
    }
    let mut writer = encoder.write_header()?;
    writer.write_image_data(&image.data)?;
    writer.finish()?;
    log::info!("wrote {} ({}x{})", path.display(), image.width, image.height);
    Ok(())
}
