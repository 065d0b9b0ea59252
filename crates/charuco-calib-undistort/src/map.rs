//! Per-pixel undistortion maps and bilinear remapping.

use charuco_calib_core::{CameraIntrinsics, PinholeCamera};
use image::{ImageBuffer, Pixel};
use nalgebra::Point2;

/// For every destination pixel, the source position in the distorted image.
#[derive(Clone, Debug, PartialEq)]
pub struct UndistortMap {
    pub width: u32,
    pub height: u32,
    pub map_x: Vec<f32>,
    pub map_y: Vec<f32>,
}

impl UndistortMap {
    /// Map from an undistorted image with intrinsics `new_k` back into the
    /// distorted source image of `camera`.
    pub fn new(camera: &PinholeCamera, new_k: &CameraIntrinsics, size: [u32; 2]) -> Self {
        let [width, height] = size;
        let n = width as usize * height as usize;
        let mut map_x = Vec::with_capacity(n);
        let mut map_y = Vec::with_capacity(n);

        if camera.distortion.is_zero() && *new_k == camera.intrinsics {
            for y in 0..height {
                for x in 0..width {
                    map_x.push(x as f32);
                    map_y.push(y as f32);
                }
            }
        } else {
            for y in 0..height {
                for x in 0..width {
                    let n = new_k.pixel_to_normalized(Point2::new(x as f64, y as f64));
                    let src = camera
                        .intrinsics
                        .normalized_to_pixel(camera.distortion.distort(n));
                    map_x.push(src.x as f32);
                    map_y.push(src.y as f32);
                }
            }
        }
        Self {
            width,
            height,
            map_x,
            map_y,
        }
    }

    pub fn is_identity(&self) -> bool {
        let w = self.width as usize;
        self.map_x
            .iter()
            .zip(&self.map_y)
            .enumerate()
            .all(|(i, (&mx, &my))| mx == (i % w) as f32 && my == (i / w) as f32)
    }
}

/// Bilinear remap of an 8-bit image through `map`, rounding to the nearest
/// value. Source pixels outside the image read as black.
pub fn remap<P>(src: &ImageBuffer<P, Vec<u8>>, map: &UndistortMap) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = P::CHANNEL_COUNT as usize;
    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let data: &[u8] = src.as_raw();
    let texel = |x: i64, y: i64, c: usize| -> f32 {
        if x < 0 || y < 0 || x >= sw || y >= sh {
            0.0
        } else {
            data[(y as usize * sw as usize + x as usize) * channels + c] as f32
        }
    };

    let mut out: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(map.width, map.height);
    let dst: &mut [u8] = &mut out;
    for (i, (&mx, &my)) in map.map_x.iter().zip(&map.map_y).enumerate() {
        if !(mx.is_finite() && my.is_finite()) {
            continue;
        }
        let x0 = mx.floor();
        let y0 = my.floor();
        let (fx, fy) = (mx - x0, my - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);
        if x0 + 1 < 0 || y0 + 1 < 0 || x0 >= sw || y0 >= sh {
            continue;
        }
        for c in 0..channels {
            let a = texel(x0, y0, c) + fx * (texel(x0 + 1, y0, c) - texel(x0, y0, c));
            let b = texel(x0, y0 + 1, c) + fx * (texel(x0 + 1, y0 + 1, c) - texel(x0, y0 + 1, c));
            let v = a + fy * (b - a);
            dst[i * channels + c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use charuco_calib_core::Distortion;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    fn camera(distortion: Distortion) -> PinholeCamera {
        PinholeCamera::new(CameraIntrinsics::new(300.0, 300.0, 31.5, 23.5), distortion)
    }

    #[test]
    fn zero_distortion_map_is_identity_and_remap_is_lossless() {
        let cam = camera(Distortion::default());
        let map = UndistortMap::new(&cam, &cam.intrinsics, [64, 48]);
        assert!(map.is_identity());

        let img = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 3) as u8, (y * 5) as u8, ((x + y) % 256) as u8]));
        assert_eq!(remap(&img, &map), img);
    }

    #[test]
    fn outside_source_is_black_and_halfway_is_interpolated() {
        let img = GrayImage::from_fn(4, 4, |x, _| Luma([if x < 2 { 100 } else { 201 }]));
        let map = UndistortMap {
            width: 3,
            height: 1,
            map_x: vec![1.5, -5.0, 3.0],
            map_y: vec![0.0, 0.0, 0.0],
        };
        let out = remap(&img, &map);
        assert_eq!(out.get_pixel(0, 0).0, [151]);
        assert_eq!(out.get_pixel(1, 0).0, [0]);
        assert_eq!(out.get_pixel(2, 0).0, [201]);
    }

    #[test]
    fn map_points_into_distorted_image() {
        let cam = camera(Distortion {
            k1: -0.3,
            ..Distortion::default()
        });
        let map = UndistortMap::new(&cam, &cam.intrinsics, [64, 48]);
        assert!(!map.is_identity());
        // barrel distortion pulls off-centre samples towards the centre
        let corner = map.map_x[0];
        assert!(corner > 0.0 && corner < 31.5);
    }
}
