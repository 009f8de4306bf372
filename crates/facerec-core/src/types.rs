use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points in a complete facial landmark set (iBUG 68-point markup).
pub const LANDMARK_COUNT: usize = 68;

/// Length of a FaceNet embedding.
pub const EMBEDDING_DIM: usize = 512;

/// Default squared-distance threshold for a positive match.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.045;

/// Axis-aligned rectangle around a detected face, in detection-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

impl FaceRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    /// Multiply every coordinate by `factor` (used to map detections on a
    /// downscaled frame back to the full frame).
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
            confidence: self.confidence,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Facial landmarks for one face, ordered by anatomical index
/// (30 = nose tip, 8 = chin, 36/45 = outer eye corners, 48/54 = mouth corners).
///
/// A set may be partial when the fitter lost track of the face; only a
/// complete set can be used for alignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<(f32, f32)>,
}

impl LandmarkSet {
    pub fn new(points: Vec<(f32, f32)>) -> Self {
        Self { points }
    }

    /// Build from interleaved `[x0, y0, x1, y1, ...]` coordinates.
    /// A trailing unpaired value is dropped.
    pub fn from_flat(coords: &[f32]) -> Self {
        Self {
            points: coords.chunks_exact(2).map(|p| (p[0], p[1])).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.points.len() == LANDMARK_COUNT
    }

    pub fn get(&self, index: usize) -> Option<(f32, f32)> {
        self.points.get(index).copied()
    }

    pub fn points(&self) -> &[(f32, f32)] {
        &self.points
    }
}

/// Face embedding vector (512-dimensional for FaceNet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Sum of squared per-component differences. No square root: the
    /// matcher only compares distances.
    pub fn squared_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }
}

/// One identity in the embedding database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Result of matching a probe embedding against the database.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Squared Euclidean distance to the closest entry (+inf for an empty database).
    pub distance: f32,
    /// Index of the closest entry in insertion order.
    pub index: Option<usize>,
    /// Label of the closest entry. Set even when `matched` is false so the
    /// caller can log who the face was nearest to.
    pub label: Option<String>,
}

impl MatchResult {
    /// The label to report: the matched identity, or `None` for an unknown face.
    pub fn identity(&self) -> Option<&str> {
        if self.matched {
            self.label.as_deref()
        } else {
            None
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch for entry {index}: probe has {probe}, entry has {entry}")]
    DimensionMismatch {
        index: usize,
        probe: usize,
        entry: usize,
    },
}

/// Strategy for comparing a probe embedding against the database entries.
pub trait Matcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[DatabaseEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError>;
}

/// Linear-scan nearest neighbour on squared Euclidean distance.
///
/// The first entry reaching the minimum wins, and a match requires the
/// minimum to be strictly below the threshold.
pub struct SquaredEuclideanMatcher;

impl Matcher for SquaredEuclideanMatcher {
    fn compare(
        &self,
        probe: &Embedding,
        gallery: &[DatabaseEntry],
        threshold: f32,
    ) -> Result<MatchResult, MatchError> {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        for (i, entry) in gallery.iter().enumerate() {
            if entry.embedding.dim() != probe.dim() {
                return Err(MatchError::DimensionMismatch {
                    index: i,
                    probe: probe.dim(),
                    entry: entry.embedding.dim(),
                });
            }
            let dist = probe.squared_distance(&entry.embedding);
            // NaN never compares lower, so a broken entry cannot hold the minimum.
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        Ok(MatchResult {
            matched: best_idx.is_some() && best_dist < threshold,
            distance: best_dist,
            index: best_idx,
            label: best_idx.map(|i| gallery[i].label.clone()),
        })
    }
}
