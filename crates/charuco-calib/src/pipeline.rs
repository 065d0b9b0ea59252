//! Batch calibration: images → markers → corners → decimation → camera.

use crate::aruco::{MarkerDetector, MarkerDetectorError, MarkerDetectorParams};
use crate::charuco::{
    CharucoBoard, CorrespondenceBuilder, CorrespondenceParams, DecimationFilter, DecimationParams,
    FrameVerdict,
};
use crate::core::{CalibrationSample, CameraModel, CornerCorrespondence, GrayImageView, SampleError};
use crate::optim::{calibrate, CalibrationError, CalibrationOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub detector: MarkerDetectorParams,
    pub correspondence: CorrespondenceParams,
    pub decimation: DecimationParams,
    pub calibration: CalibrationOptions,
}

impl PipelineConfig {
    /// Defaults with a different decimation interval.
    pub fn with_decimation(interval: usize) -> Self {
        let mut cfg = Self::default();
        cfg.decimation.interval = interval;
        cfg
    }
}

/// Why an image did not contribute a calibration sample.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    UnreadableImage { reason: String },
    NoMarkers,
    InsufficientCorners { found: usize, required: usize },
    Decimated,
}

/// Per-image record of a run, in input order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrameOutcome {
    pub label: String,
    pub markers: usize,
    pub corners: usize,
    pub skipped: Option<SkipReason>,
}

/// Counts of how the input images were used.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterReport {
    pub used: usize,
    pub no_markers: usize,
    pub insufficient: usize,
    pub decimated: usize,
    pub unreadable: usize,
    pub frames: Vec<FrameOutcome>,
}

impl FilterReport {
    fn record(&mut self, frame: FrameOutcome) {
        match &frame.skipped {
            None => self.used += 1,
            Some(SkipReason::UnreadableImage { .. }) => self.unreadable += 1,
            Some(SkipReason::NoMarkers) => self.no_markers += 1,
            Some(SkipReason::InsufficientCorners { .. }) => self.insufficient += 1,
            Some(SkipReason::Decimated) => self.decimated += 1,
        }
        self.frames.push(frame);
    }

    pub fn total(&self) -> usize {
        self.frames.len()
    }
}

/// Successful calibration with its bookkeeping.
#[derive(Clone, Debug)]
pub struct CalibrationRun {
    pub model: CameraModel,
    pub report: FilterReport,
    /// Samples handed to the solver, in input order.
    pub samples: Vec<CalibrationSample>,
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("no input images")]
    NoImages,
    #[error(transparent)]
    Detector(#[from] MarkerDetectorError),
    #[error("image {label}: {source}")]
    Sample {
        label: String,
        #[source]
        source: SampleError,
    },
    #[error("calibration failed after using {used} of {total} images: {source}")]
    Calibration {
        used: usize,
        total: usize,
        #[source]
        source: CalibrationError,
    },
}

/// Detection output of one image before decimation.
#[derive(Clone, Debug)]
pub struct FrameObservation {
    pub label: String,
    pub image_size: [u32; 2],
    pub markers: usize,
    pub corners: Vec<CornerCorrespondence>,
}

enum Loaded {
    Observed(FrameObservation),
    Unreadable { label: String, reason: String },
}

/// Borrow an `image` buffer as a detector view.
pub fn gray_view(image: &image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: image.width() as usize,
        height: image.height() as usize,
        data: image.as_raw(),
    }
}

/// Runs the full calibration over an ordered image sequence.
#[derive(Debug)]
pub struct CalibrationPipeline {
    board: CharucoBoard,
    config: PipelineConfig,
    detector: MarkerDetector,
}

impl CalibrationPipeline {
    pub fn new(board: CharucoBoard, config: PipelineConfig) -> Result<Self, PipelineError> {
        let detector = MarkerDetector::new(board.dictionary().clone(), config.detector.clone())?;
        Ok(Self {
            board,
            config,
            detector,
        })
    }

    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Markers and interpolated corners of a single image.
    pub fn observe(&self, label: impl Into<String>, image: &image::GrayImage) -> FrameObservation {
        let view = gray_view(image);
        let detection = self.detector.detect(&view);
        let corners = CorrespondenceBuilder::new(&self.board, self.config.correspondence.clone())
            .build(&view, &detection.markers);
        let frame = FrameObservation {
            label: label.into(),
            image_size: [image.width(), image.height()],
            markers: detection.markers.len(),
            corners,
        };
        log::debug!(
            "{}: {} markers, {} corners",
            frame.label,
            frame.markers,
            frame.corners.len()
        );
        frame
    }

    /// Load, detect and calibrate from image files. Unreadable files are
    /// logged and skipped.
    #[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(images = paths.len())))]
    pub fn run<P: AsRef<Path> + Sync>(&self, paths: &[P]) -> Result<CalibrationRun, PipelineError> {
        if paths.is_empty() {
            return Err(PipelineError::NoImages);
        }
        let load = |path: &P| -> Loaded {
            let path = path.as_ref();
            let label = path.display().to_string();
            match image::open(path) {
                Ok(img) => Loaded::Observed(self.observe(label, &img.to_luma8())),
                Err(e) => Loaded::Unreadable {
                    label,
                    reason: e.to_string(),
                },
            }
        };

        #[cfg(feature = "rayon")]
        let frames: Vec<Loaded> = paths.par_iter().map(load).collect();
        #[cfg(not(feature = "rayon"))]
        let frames: Vec<Loaded> = paths.iter().map(load).collect();

        self.finish(frames)
    }

    /// Same as [`CalibrationPipeline::run`] for images already in memory;
    /// labels are `image{index}`.
    pub fn run_images(&self, images: &[image::GrayImage]) -> Result<CalibrationRun, PipelineError> {
        if images.is_empty() {
            return Err(PipelineError::NoImages);
        }
        let observe = |(i, img): (usize, &image::GrayImage)| {
            Loaded::Observed(self.observe(format!("image{i}"), img))
        };

        #[cfg(feature = "rayon")]
        let frames: Vec<Loaded> = images.par_iter().enumerate().map(observe).collect();
        #[cfg(not(feature = "rayon"))]
        let frames: Vec<Loaded> = images.iter().enumerate().map(observe).collect();

        self.finish(frames)
    }

    /// Decimate observations in input order and calibrate.
    pub fn calibrate_observations(
        &self,
        frames: Vec<FrameObservation>,
    ) -> Result<CalibrationRun, PipelineError> {
        self.finish(frames.into_iter().map(Loaded::Observed).collect())
    }

    fn finish(&self, frames: Vec<Loaded>) -> Result<CalibrationRun, PipelineError> {
        let mut filter = DecimationFilter::new(self.config.decimation);
        let mut report = FilterReport::default();
        let mut samples = Vec::new();

        for frame in frames {
            let obs = match frame {
                Loaded::Observed(obs) => obs,
                Loaded::Unreadable { label, reason } => {
                    log::warn!("{label} cannot be read: {reason}");
                    report.record(FrameOutcome {
                        label,
                        markers: 0,
                        corners: 0,
                        skipped: Some(SkipReason::UnreadableImage { reason }),
                    });
                    continue;
                }
            };
            let skipped = match filter.admit(obs.markers, obs.corners.len()) {
                FrameVerdict::Accepted => None,
                FrameVerdict::NoMarkers => Some(SkipReason::NoMarkers),
                FrameVerdict::InsufficientCorners { found, required } => {
                    Some(SkipReason::InsufficientCorners { found, required })
                }
                FrameVerdict::Decimated => Some(SkipReason::Decimated),
            };
            let outcome = FrameOutcome {
                label: obs.label.clone(),
                markers: obs.markers,
                corners: obs.corners.len(),
                skipped: skipped.clone(),
            };
            if skipped.is_none() {
                let sample = CalibrationSample::new(obs.label.clone(), obs.image_size, obs.corners, &self.board)
                    .map_err(|source| PipelineError::Sample {
                        label: obs.label,
                        source,
                    })?;
                samples.push(sample);
            } else {
                log::debug!("{}: skipped ({:?})", outcome.label, skipped);
            }
            report.record(outcome);
        }

        log::info!(
            "using {} of {} images for calibration ({} without markers, {} with too few corners, {} decimated, {} unreadable)",
            report.used,
            report.total(),
            report.no_markers,
            report.insufficient,
            report.decimated,
            report.unreadable
        );

        let model = calibrate(&samples, &self.board, &self.config.calibration).map_err(|source| {
            PipelineError::Calibration {
                used: report.used,
                total: report.total(),
                source,
            }
        })?;
        Ok(CalibrationRun {
            model,
            report,
            samples,
        })
    }
}

/// Image files in `dir` with extension `ext` (case-insensitive), sorted by
/// path.
pub fn list_images(dir: impl AsRef<Path>, ext: &str) -> std::io::Result<Vec<PathBuf>> {
    let ext = ext.trim_start_matches('.');
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(ext))
        })
        .collect();
    paths.sort();
    Ok(paths)
}
