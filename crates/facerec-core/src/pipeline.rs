//! Per-frame recognition pipeline.
//!
//! detect → fit landmarks → align → embed → match, once per frame. The
//! pipeline owns the three model capabilities, the embedding database and
//! the matcher, and returns a [`FrameReport`] in full-frame coordinates.

use crate::alignment::{self, AlignError};
use crate::database::EmbeddingDatabase;
use crate::detector::{DetectorError, FaceDetector};
use crate::face_model::FaceModel3d;
use crate::landmarks::{LandmarkError, LandmarkFitter};
use crate::recognizer::{EmbeddingModel, RecognizerError};
use crate::types::{FaceRegion, MatchError, Matcher, SquaredEuclideanMatcher, DEFAULT_MATCH_THRESHOLD};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detection scale must be a positive number, got {0}")]
    InvalidScale(f32),
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("landmark fitting failed: {0}")]
    Landmarks(#[from] LandmarkError),
    #[error("landmark fitter returned {sets} sets for {regions} faces")]
    LandmarkCount { regions: usize, sets: usize },
    #[error("embedding inference failed: {0}")]
    Embedding(#[from] RecognizerError),
    #[error("matching failed: {0}")]
    Match(#[from] MatchError),
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Squared-distance threshold; a match needs a strictly smaller distance.
    pub threshold: f32,
    /// Frames are shrunk by this factor before detection.
    pub detection_scale: f32,
    pub face_model: FaceModel3d,
    /// Keep each aligned crop in the report (for the crop preview windows).
    pub keep_crops: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            detection_scale: 1.0,
            face_model: FaceModel3d::default(),
            keep_crops: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FaceStatus {
    Recognized { label: String, distance: f32 },
    Unknown { distance: f32 },
    /// Alignment failed; the face was not embedded.
    Skipped(AlignError),
}

#[derive(Debug, Clone)]
pub struct FaceOutcome {
    /// Face box in full-frame pixels.
    pub region: FaceRegion,
    pub status: FaceStatus,
    pub crop: Option<RgbImage>,
}

/// Everything the pipeline found in one frame, in detection order.
#[derive(Debug, Clone, Default)]
pub struct FrameReport {
    pub faces: Vec<FaceOutcome>,
}

impl FrameReport {
    /// Labels of recognized faces.
    pub fn recognized(&self) -> impl Iterator<Item = &str> {
        self.faces.iter().filter_map(|f| match &f.status {
            FaceStatus::Recognized { label, .. } => Some(label.as_str()),
            _ => None,
        })
    }

    pub fn crops(&self) -> impl Iterator<Item = &RgbImage> {
        self.faces.iter().filter_map(|f| f.crop.as_ref())
    }
}

pub struct FramePipeline<D, L, E> {
    detector: D,
    fitter: L,
    embedder: E,
    database: EmbeddingDatabase,
    matcher: Box<dyn Matcher>,
    config: PipelineConfig,
}

impl<D, L, E> FramePipeline<D, L, E>
where
    D: FaceDetector,
    L: LandmarkFitter,
    E: EmbeddingModel,
{
    pub fn new(
        detector: D,
        fitter: L,
        embedder: E,
        database: EmbeddingDatabase,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        let scale = config.detection_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(PipelineError::InvalidScale(scale));
        }
        Ok(Self {
            detector,
            fitter,
            embedder,
            database,
            matcher: Box::new(SquaredEuclideanMatcher),
            config,
        })
    }

    /// Replace the default squared-Euclidean matcher.
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn database(&self) -> &EmbeddingDatabase {
        &self.database
    }

    /// Run one frame through the pipeline.
    ///
    /// An alignment failure only skips that face. Detector, landmark and
    /// embedding failures abort the frame.
    pub fn process_frame(&mut self, frame: &RgbImage) -> Result<FrameReport, PipelineError> {
        let scale = self.config.detection_scale;
        let small = downscale(frame, scale);

        let regions = self.detector.detect(&small)?;
        if regions.is_empty() {
            return Ok(FrameReport::default());
        }

        let landmark_sets = self.fitter.fit(&small, &regions)?;
        if landmark_sets.len() != regions.len() {
            return Err(PipelineError::LandmarkCount {
                regions: regions.len(),
                sets: landmark_sets.len(),
            });
        }

        // Crops are cut at the size the embedding model takes.
        let crop_size = self.embedder.input_size();
        let mut faces = Vec::with_capacity(regions.len());
        for (i, (region, landmarks)) in regions.iter().zip(&landmark_sets).enumerate() {
            let aligned = match alignment::align_face(
                &small,
                landmarks,
                region,
                &self.config.face_model,
                crop_size,
            ) {
                Ok(aligned) => aligned,
                Err(e) => {
                    tracing::warn!(face = i, error = %e, "skipping face");
                    faces.push(FaceOutcome {
                        region: region.scaled(scale),
                        status: FaceStatus::Skipped(e),
                        crop: None,
                    });
                    continue;
                }
            };

            let embedding = self.embedder.embed(&aligned.image)?;
            let result =
                self.database
                    .identify(self.matcher.as_ref(), &embedding, self.config.threshold)?;

            let status = match result.identity() {
                Some(label) => {
                    tracing::info!(face = i, "Hello {label} confidence: {}", result.distance);
                    FaceStatus::Recognized {
                        label: label.to_string(),
                        distance: result.distance,
                    }
                }
                None => {
                    tracing::info!(
                        face = i,
                        nearest = result.label.as_deref().unwrap_or("-"),
                        "WHO ARE YOU ? confidence: {}",
                        result.distance
                    );
                    FaceStatus::Unknown {
                        distance: result.distance,
                    }
                }
            };

            faces.push(FaceOutcome {
                region: region.scaled(scale),
                status,
                crop: self.config.keep_crops.then_some(aligned.image),
            });
        }

        Ok(FrameReport { faces })
    }
}

/// Shrink `frame` by `scale` (bilinear). A scale of 1 borrows the frame.
fn downscale(frame: &RgbImage, scale: f32) -> Cow<'_, RgbImage> {
    if (scale - 1.0).abs() < f32::EPSILON {
        return Cow::Borrowed(frame);
    }
    let w = ((frame.width() as f32 / scale).round() as u32).max(1);
    let h = ((frame.height() as f32 / scale).round() as u32).max(1);
    Cow::Owned(imageops::resize(frame, w, h, FilterType::Triangle))
}
