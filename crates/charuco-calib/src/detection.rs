//! Marker detection previews: detected outlines and ids drawn onto copies
//! of the input images.

use crate::aruco::{DetectedMarker, MarkerDetector};
use crate::io::ResultIoError;
use crate::pipeline::gray_view;
use image::{Rgb, RgbImage};
use nalgebra::Point2;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory created next to the input images for annotated copies.
pub const DETECTION_DIR: &str = "detection_result";

const OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);
const FIRST_CORNER: Rgb<u8> = Rgb([255, 0, 0]);
const ID_TEXT: Rgb<u8> = Rgb([0, 0, 255]);

/// 3×5 digit glyphs, row-major, most significant bit first.
const DIGITS: [u16; 10] = [
    0b111_101_101_101_111,
    0b010_110_010_010_111,
    0b111_001_111_100_111,
    0b111_001_111_001_111,
    0b101_101_111_001_001,
    0b111_100_111_001_111,
    0b111_100_111_101_111,
    0b111_001_001_001_001,
    0b111_101_111_101_111,
    0b111_101_111_001_111,
];

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham segment between rounded end points.
fn draw_segment(img: &mut RgbImage, a: Point2<f32>, b: Point2<f32>, color: Rgb<u8>) {
    let (mut x0, mut y0) = (a.x.round() as i64, a.y.round() as i64);
    let (x1, y1) = (b.x.round() as i64, b.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x0, y0, color);
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

fn fill_square(img: &mut RgbImage, c: Point2<f32>, half: i64, color: Rgb<u8>) {
    let (cx, cy) = (c.x.round() as i64, c.y.round() as i64);
    for y in cy - half..=cy + half {
        for x in cx - half..=cx + half {
            put(img, x, y, color);
        }
    }
}

/// Write `id` in glyph pixels of `scale` image pixels, centred on `centre`.
fn draw_number(img: &mut RgbImage, id: u32, centre: Point2<f32>, scale: i64, color: Rgb<u8>) {
    let text = id.to_string();
    let n = text.len() as i64;
    let width = (4 * n - 1) * scale;
    let x0 = centre.x.round() as i64 - width / 2;
    let y0 = centre.y.round() as i64 - 5 * scale / 2;
    for (i, ch) in text.bytes().enumerate() {
        let glyph = DIGITS[(ch - b'0') as usize];
        let gx = x0 + 4 * scale * i as i64;
        for bit in 0..15 {
            if glyph >> (14 - bit) & 1 == 0 {
                continue;
            }
            let (col, row) = (bit % 3, bit / 3);
            for yy in 0..scale {
                for xx in 0..scale {
                    put(img, gx + col * scale + xx, y0 + row * scale + yy, color);
                }
            }
        }
    }
}

/// Draw marker outlines in green, the first corner (TL of the marker) as a
/// red square and the id in blue at the marker centre.
pub fn draw_detected_markers(img: &mut RgbImage, markers: &[DetectedMarker]) {
    for m in markers {
        for i in 0..4 {
            draw_segment(img, m.corners[i], m.corners[(i + 1) % 4], OUTLINE);
        }
        let side = m.side_length();
        let half = ((side / 25.0).round() as i64).max(1);
        fill_square(img, m.corners[0], half, FIRST_CORNER);

        let centre = m
            .corners
            .iter()
            .fold(Point2::new(0.0f32, 0.0), |acc, c| acc + c.coords / 4.0);
        let scale = ((side / 20.0).round() as i64).max(1);
        draw_number(img, m.id, centre, scale, ID_TEXT);
    }
}

/// Per-image result of [`write_detection_images`].
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionOutcome {
    pub source: PathBuf,
    /// Detected marker ids, ascending.
    pub ids: Vec<u32>,
    /// Annotated copy, written only when markers were found.
    pub written: Option<PathBuf>,
}

/// Detect markers in each image and write annotated copies under the
/// source file name into `out_dir`. Unreadable images are skipped with a
/// warning; images without markers get no copy.
pub fn write_detection_images<P: AsRef<Path>>(
    detector: &MarkerDetector,
    images: &[P],
    out_dir: impl AsRef<Path>,
) -> Result<Vec<DetectionOutcome>, ResultIoError> {
    let out_dir = out_dir.as_ref();
    let mut outcomes = Vec::with_capacity(images.len());
    for path in images {
        let path = path.as_ref();
        let decoded = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("{} cannot be read: {e}", path.display());
                continue;
            }
        };
        let gray = decoded.to_luma8();
        let detection = detector.detect(&gray_view(&gray));
        let ids: Vec<u32> = detection.markers.iter().map(|m| m.id).collect();
        log::info!("{}: {} markers", path.display(), ids.len());

        let written = match path.file_name() {
            Some(name) if !ids.is_empty() => {
                fs::create_dir_all(out_dir).map_err(|source| ResultIoError::Io {
                    path: out_dir.to_path_buf(),
                    source,
                })?;
                let mut annotated = decoded.to_rgb8();
                draw_detected_markers(&mut annotated, &detection.markers);
                let dst = out_dir.join(name);
                annotated.save(&dst).map_err(|source| ResultIoError::Image {
                    path: dst.clone(),
                    source,
                })?;
                Some(dst)
            }
            _ => None,
        };
        outcomes.push(DetectionOutcome {
            source: path.to_path_buf(),
            ids,
            written,
        });
    }
    Ok(outcomes)
}
