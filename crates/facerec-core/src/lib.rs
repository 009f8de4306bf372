//! facerec-core — face alignment and recognition engine.
//!
//! SCRFD detection, 68-point landmark fitting and FaceNet embeddings run via
//! ONNX Runtime on the CPU. Faces are aligned by head pose before embedding
//! and matched against a flat-text embedding database.

pub mod alignment;
pub mod annotate;
pub mod database;
pub mod detector;
pub mod face_model;
pub mod landmarks;
pub mod pipeline;
pub mod pose;
pub mod recognizer;
pub mod types;

pub use alignment::{align_face, AlignError, AlignedFace, ALIGNED_SIZE};
pub use database::{DatabaseError, EmbeddingDatabase};
pub use detector::{FaceDetector, ScrfdDetector};
pub use face_model::FaceModel3d;
pub use landmarks::{LandmarkFitter, OnnxLandmarkFitter};
pub use pipeline::{FaceOutcome, FaceStatus, FramePipeline, FrameReport, PipelineConfig, PipelineError};
pub use recognizer::{EmbeddingModel, FacenetEmbedder};
pub use types::{
    DatabaseEntry, Embedding, FaceRegion, LandmarkSet, MatchResult, Matcher,
    SquaredEuclideanMatcher, DEFAULT_MATCH_THRESHOLD, EMBEDDING_DIM, LANDMARK_COUNT,
};
