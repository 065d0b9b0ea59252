//! Calibration result files and undistorted image output.
//!
//! Results are stored as `camera_param.json` (camera matrix, distortion and
//! poses, keys sorted) or `camera_param.bin` (`bincode`, additionally
//! carrying the standard deviations and error statistics).

use crate::core::{
    CameraIntrinsics, CameraModel, CameraModelError, Distortion, StdDeviations, ViewPose,
    INTRINSIC_PARAMS,
};
use crate::undistort::{UndistortError, UndistortParams, Undistorter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

/// Base name of result files.
pub const RESULT_STEM: &str = "camera_param";
/// Directory created next to the input images for undistorted output.
pub const UNDISTORT_DIR: &str = "undistort_result";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ResultFormat {
    Json,
    #[default]
    #[cfg_attr(feature = "cli", value(name = "bin"))]
    Binary,
}

impl ResultFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ResultFormat::Json => "json",
            ResultFormat::Binary => "bin",
        }
    }

    pub fn file_name(self) -> String {
        format!("{RESULT_STEM}.{}", self.extension())
    }

    /// `.json` selects JSON; anything else is read as binary.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(e) if e.eq_ignore_ascii_case("json") => ResultFormat::Json,
            _ => ResultFormat::Binary,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ResultIoError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error("invalid camera parameters: {0}")]
    Camera(#[from] CameraModelError),
    #[error(transparent)]
    Undistort(#[from] UndistortError),
    #[error("{path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ResultIoError + '_ {
    move |source| ResultIoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// JSON layout: column vectors are nested one-element arrays.
#[derive(Debug, Serialize, Deserialize)]
struct JsonResult {
    camera_matrix: [[f64; 3]; 3],
    dist_coeff: Vec<Vec<f64>>,
    rvecs: Vec<[[f64; 1]; 3]>,
    tvecs: Vec<[[f64; 1]; 3]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct BinaryResult {
    camera_matrix: [[f64; 3]; 3],
    dist_coeff: Vec<f64>,
    rvecs: Vec<[f64; 3]>,
    tvecs: Vec<[f64; 3]>,
    std_intrinsics: Vec<f64>,
    std_extrinsics: Vec<[f64; 6]>,
    rms_error: f64,
    per_view_errors: Vec<f64>,
    image_size: Option<[u32; 2]>,
}

fn column(v: [f64; 3]) -> [[f64; 1]; 3] {
    [[v[0]], [v[1]], [v[2]]]
}

fn uncolumn(v: &[[f64; 1]; 3]) -> [f64; 3] {
    [v[0][0], v[1][0], v[2][0]]
}

impl JsonResult {
    fn from_model(model: &CameraModel) -> Self {
        Self {
            camera_matrix: model.intrinsics.to_rows(),
            dist_coeff: vec![model.distortion.coeffs().to_vec()],
            rvecs: model.views.iter().map(|v| column(v.rvec)).collect(),
            tvecs: model.views.iter().map(|v| column(v.tvec)).collect(),
        }
    }

    fn into_model(self) -> Result<CameraModel, CameraModelError> {
        let coeffs: Vec<f64> = self.dist_coeff.into_iter().flatten().collect();
        if self.rvecs.len() != self.tvecs.len() {
            return Err(CameraModelError::ViewCountMismatch {
                what: "tvecs",
                expected: self.rvecs.len(),
                got: self.tvecs.len(),
            });
        }
        let mut model = CameraModel::from_camera(crate::core::PinholeCamera::new(
            CameraIntrinsics::from_rows(&self.camera_matrix)?,
            Distortion::from_coeffs(&coeffs)?,
        ));
        model.views = self
            .rvecs
            .iter()
            .zip(&self.tvecs)
            .map(|(r, t)| ViewPose::new(uncolumn(r), uncolumn(t)))
            .collect();
        model.validate()?;
        Ok(model)
    }
}

impl BinaryResult {
    fn from_model(model: &CameraModel) -> Self {
        let (std_intrinsics, std_extrinsics) = match &model.std_deviations {
            Some(s) => (s.intrinsics.to_vec(), s.extrinsics.clone()),
            None => (Vec::new(), Vec::new()),
        };
        Self {
            camera_matrix: model.intrinsics.to_rows(),
            dist_coeff: model.distortion.coeffs().to_vec(),
            rvecs: model.views.iter().map(|v| v.rvec).collect(),
            tvecs: model.views.iter().map(|v| v.tvec).collect(),
            std_intrinsics,
            std_extrinsics,
            rms_error: model.rms_error,
            per_view_errors: model.per_view_errors.clone(),
            image_size: model.image_size,
        }
    }

    fn into_model(self) -> Result<CameraModel, CameraModelError> {
        if self.rvecs.len() != self.tvecs.len() {
            return Err(CameraModelError::ViewCountMismatch {
                what: "tvecs",
                expected: self.rvecs.len(),
                got: self.tvecs.len(),
            });
        }
        let std_deviations = match self.std_intrinsics.len() {
            0 => None,
            INTRINSIC_PARAMS => {
                let mut intrinsics = [0.0; INTRINSIC_PARAMS];
                intrinsics.copy_from_slice(&self.std_intrinsics);
                Some(StdDeviations {
                    intrinsics,
                    extrinsics: self.std_extrinsics,
                })
            }
            got => {
                return Err(CameraModelError::ViewCountMismatch {
                    what: "intrinsic std deviations",
                    expected: INTRINSIC_PARAMS,
                    got,
                })
            }
        };
        let model = CameraModel {
            intrinsics: CameraIntrinsics::from_rows(&self.camera_matrix)?,
            distortion: Distortion::from_coeffs(&self.dist_coeff)?,
            views: self
                .rvecs
                .into_iter()
                .zip(self.tvecs)
                .map(|(r, t)| ViewPose::new(r, t))
                .collect(),
            rms_error: self.rms_error,
            per_view_errors: self.per_view_errors,
            std_deviations,
            image_size: self.image_size,
        };
        model.validate()?;
        Ok(model)
    }
}

/// Serialize a model in the given format.
pub fn encode_result(model: &CameraModel, format: ResultFormat) -> Result<Vec<u8>, ResultIoError> {
    Ok(match format {
        ResultFormat::Json => {
            let mut bytes = serde_json::to_vec_pretty(&JsonResult::from_model(model))?;
            bytes.push(b'\n');
            bytes
        }
        ResultFormat::Binary => bincode::serialize(&BinaryResult::from_model(model))?,
    })
}

/// Parse and validate a model.
pub fn decode_result(bytes: &[u8], format: ResultFormat) -> Result<CameraModel, ResultIoError> {
    let model = match format {
        ResultFormat::Json => serde_json::from_slice::<JsonResult>(bytes)?.into_model()?,
        ResultFormat::Binary => bincode::deserialize::<BinaryResult>(bytes)?.into_model()?,
    };
    Ok(model)
}

/// Write `camera_param.{json,bin}` into `dir` (created if needed).
pub fn save_result(
    model: &CameraModel,
    dir: impl AsRef<Path>,
    format: ResultFormat,
) -> Result<PathBuf, ResultIoError> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).map_err(io_err(dir))?;
    let path = dir.join(format.file_name());
    let bytes = encode_result(model, format)?;
    fs::write(&path, bytes).map_err(io_err(&path))?;
    log::info!("saved camera parameters to {}", path.display());
    Ok(path)
}

/// Load a result file; the format follows the extension.
pub fn load_result(path: impl AsRef<Path>) -> Result<CameraModel, ResultIoError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(io_err(path))?;
    decode_result(&bytes, ResultFormat::from_path(path))
}

fn fmt_row(v: &[f64]) -> String {
    let cells: Vec<String> = v.iter().map(|x| format!("{x:.3}")).collect();
    format!("[{}]", cells.join(", "))
}

/// Human-readable report of a calibration.
pub fn summary(model: &CameraModel) -> String {
    let mut s = String::new();
    let _ = writeln!(s, "####################");
    let _ = writeln!(s, "Final re-projection error: {:.6}", model.rms_error);
    let _ = writeln!(s, "Camera matrix:");
    for row in model.intrinsics.to_rows() {
        let _ = writeln!(s, "  {}", fmt_row(&row));
    }
    let _ = writeln!(s, "Distortion coefficients [k1, k2, p1, p2, k3]:");
    let _ = writeln!(s, "  {}", fmt_row(&model.distortion.coeffs()));
    let _ = writeln!(s, "Rotation vectors:");
    for v in &model.views {
        let _ = writeln!(s, "  {}", fmt_row(&v.rvec));
    }
    let _ = writeln!(s, "Translation vectors:");
    for v in &model.views {
        let _ = writeln!(s, "  {}", fmt_row(&v.tvec));
    }
    if let Some(std) = &model.std_deviations {
        let _ = writeln!(s, "Standard deviations of intrinsics [fx, fy, cx, cy, k1, k2, p1, p2, k3]:");
        let _ = writeln!(s, "  {}", fmt_row(&std.intrinsics));
        let _ = writeln!(s, "Standard deviations of extrinsics [rx, ry, rz, tx, ty, tz]:");
        for e in &std.extrinsics {
            let _ = writeln!(s, "  {}", fmt_row(e));
        }
    }
    let _ = writeln!(s, "Per-view re-projection errors:");
    let _ = writeln!(s, "  {}", fmt_row(&model.per_view_errors));
    s
}

/// Undistort image files into `out_dir/undistorted{i+1}.png`, numbered by
/// input position. Unreadable images, and images whose size differs from
/// the model's calibration size, are skipped with a warning.
pub fn undistort_images<P: AsRef<Path>>(
    model: &CameraModel,
    images: &[P],
    out_dir: impl AsRef<Path>,
    params: UndistortParams,
) -> Result<Vec<PathBuf>, ResultIoError> {
    model.validate()?;
    let out_dir = out_dir.as_ref();
    fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;

    let mut undistorters: HashMap<[u32; 2], Undistorter> = HashMap::new();
    let mut written = Vec::with_capacity(images.len());
    for (i, path) in images.iter().enumerate() {
        let path = path.as_ref();
        let img = match image::open(path) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                log::warn!("{} cannot be read: {e}", path.display());
                continue;
            }
        };
        let size = [img.width(), img.height()];
        let undistorter = match undistorters.entry(size) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let u = match Undistorter::new(model, size, params) {
                    Ok(u) => u,
                    Err(UndistortError::SizeMismatch { expected, got }) => {
                        log::warn!(
                            "{} is {}x{}, camera was calibrated at {}x{}; skipped",
                            path.display(),
                            got[0],
                            got[1],
                            expected[0],
                            expected[1]
                        );
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                log::info!(
                    "new camera matrix for {}x{}: {:?}, roi {:?}",
                    size[0],
                    size[1],
                    u.new_intrinsics(),
                    u.roi()
                );
                e.insert(u)
            }
        };
        let out = undistorter.undistort(&img)?;
        let dst = out_dir.join(format!("undistorted{}.png", i + 1));
        out.save(&dst).map_err(|source| ResultIoError::Image {
            path: dst.clone(),
            source,
        })?;
        log::debug!("wrote {}", dst.display());
        written.push(dst);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PinholeCamera;

    fn model() -> CameraModel {
        CameraModel {
            intrinsics: CameraIntrinsics::new(800.0, 805.0, 320.0, 240.0),
            distortion: Distortion {
                k1: -0.1,
                k2: 0.01,
                p1: 0.001,
                p2: 0.0,
                k3: 0.0,
            },
            views: vec![
                ViewPose::new([0.1, 0.2, 0.3], [1.0, 2.0, 300.0]),
                ViewPose::new([-0.1, 0.0, 0.05], [-4.0, 2.0, 350.0]),
            ],
            rms_error: 0.2,
            per_view_errors: vec![0.1, 0.3],
            std_deviations: Some(StdDeviations {
                intrinsics: [1.0; INTRINSIC_PARAMS],
                extrinsics: vec![[0.01; 6]; 2],
            }),
            image_size: Some([640, 480]),
        }
    }

    #[test]
    fn json_layout_uses_sorted_keys_and_column_vectors() {
        let bytes = encode_result(&model(), ResultFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let keys: Vec<&str> = value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["camera_matrix", "dist_coeff", "rvecs", "tvecs"]);
        assert_eq!(value["camera_matrix"][0][0], 800.0);
        assert_eq!(value["dist_coeff"][0].as_array().unwrap().len(), 5);
        assert_eq!(value["tvecs"][1][2][0], 350.0);

        let back = decode_result(&bytes, ResultFormat::Json).unwrap();
        assert_eq!(back.intrinsics, model().intrinsics);
        assert_eq!(back.views, model().views);
        assert!(back.std_deviations.is_none());
    }

    #[test]
    fn binary_result_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_result(&model(), dir.path().join("result"), ResultFormat::Binary).unwrap();
        assert_eq!(path.file_name().unwrap(), "camera_param.bin");
        assert_eq!(load_result(&path).unwrap(), model());
    }

    #[test]
    fn malformed_models_are_rejected() {
        let mut bad = model();
        bad.intrinsics.fx = -1.0;
        let bytes = encode_result(&bad, ResultFormat::Json).unwrap();
        assert!(matches!(
            decode_result(&bytes, ResultFormat::Json),
            Err(ResultIoError::Camera(CameraModelError::InvalidFocalLength { .. }))
        ));

        let json = r#"{"camera_matrix": [[800,0,320],[0,800,240],[0,0,1]], "dist_coeff": [[0.1, 0.2]], "rvecs": [], "tvecs": []}"#;
        assert!(matches!(
            decode_result(json.as_bytes(), ResultFormat::Json),
            Err(ResultIoError::Camera(CameraModelError::DistortionLength { len: 2 }))
        ));

        assert!(load_result("/no/such/camera_param.bin").is_err());
    }

    #[test]
    fn undistorts_files_in_order_and_skips_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.png");
        let b = dir.path().join("b.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([90, 120, 150]))
            .save(&a)
            .unwrap();
        fs::write(&b, b"garbage").unwrap();

        let m = CameraModel::from_camera(PinholeCamera::new(
            CameraIntrinsics::new(60.0, 60.0, 31.5, 23.5),
            Distortion {
                k1: -0.2,
                ..Distortion::default()
            },
        ));
        let out_dir = dir.path().join(UNDISTORT_DIR);
        let written = undistort_images(&m, &[b, a], &out_dir, UndistortParams::default()).unwrap();
        assert_eq!(written, vec![out_dir.join("undistorted2.png")]);
        let img = image::open(&written[0]).unwrap().to_rgb8();
        assert!(img.width() <= 64 && img.height() <= 48);
    }

    #[test]
    fn images_of_another_size_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let small = dir.path().join("small.png");
        let full = dir.path().join("full.png");
        image::RgbImage::from_pixel(64, 48, image::Rgb([10, 20, 30]))
            .save(&small)
            .unwrap();
        image::RgbImage::from_pixel(640, 480, image::Rgb([10, 20, 30]))
            .save(&full)
            .unwrap();

        let m = model();
        assert_eq!(m.image_size, Some([640, 480]));
        let out_dir = dir.path().join(UNDISTORT_DIR);
        let written = undistort_images(&m, &[small, full], &out_dir, UndistortParams::default()).unwrap();
        assert_eq!(written, vec![out_dir.join("undistorted2.png")]);
    }

    #[test]
    fn summary_mentions_all_blocks() {
        let text = summary(&model());
        for needle in ["re-projection error", "Camera matrix", "Rotation vectors", "Standard deviations of extrinsics", "Per-view"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }
}
