//! FaceNet embedding extractor via ONNX Runtime.
//!
//! Turns a 160×160 aligned RGB face into a 512-dimensional embedding. The
//! graph takes the raw pixel batch on `input` and a `phase_train` flag, and
//! returns `embeddings`.

use crate::types::{Embedding, EMBEDDING_DIM};
use image::RgbImage;
use ndarray::{arr0, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const FACENET_INPUT_SIZE: usize = 160;
const FACENET_INPUT: &str = "input";
const FACENET_PHASE_TRAIN: &str = "phase_train";
const FACENET_OUTPUT: &str = "embeddings";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("model is missing tensor {0:?}")]
    MissingTensor(&'static str),
    #[error("aligned face must be {FACENET_INPUT_SIZE}x{FACENET_INPUT_SIZE}, got {0}x{1}")]
    BadInputSize(u32, u32),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding-inference capability: aligned face in, embedding out.
pub trait EmbeddingModel {
    /// Side of the square aligned crop `embed` accepts.
    fn input_size(&self) -> u32;

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError>;
}

/// FaceNet (20170512-110547) recognizer.
pub struct FacenetEmbedder {
    session: Session,
}

impl FacenetEmbedder {
    /// Load the FaceNet ONNX graph, checking it exposes the expected tensors.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let inputs: Vec<String> = session.inputs().iter().map(|i| i.name().to_string()).collect();
        let outputs: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            inputs = ?inputs,
            outputs = ?outputs,
            "loaded FaceNet model"
        );

        for name in [FACENET_INPUT, FACENET_PHASE_TRAIN] {
            if !inputs.iter().any(|n| n == name) {
                return Err(RecognizerError::MissingTensor(name));
            }
        }
        if !outputs.iter().any(|n| n == FACENET_OUTPUT) {
            return Err(RecognizerError::MissingTensor(FACENET_OUTPUT));
        }

        Ok(Self { session })
    }

    /// NHWC float batch of one image holding raw 0–255 pixel values.
    fn preprocess(face: &RgbImage) -> Result<Array4<f32>, RecognizerError> {
        let (w, h) = face.dimensions();
        if w as usize != FACENET_INPUT_SIZE || h as usize != FACENET_INPUT_SIZE {
            return Err(RecognizerError::BadInputSize(w, h));
        }

        let mut tensor = Array4::<f32>::zeros((1, FACENET_INPUT_SIZE, FACENET_INPUT_SIZE, 3));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, y as usize, x as usize, c]] = pixel[c] as f32;
            }
        }
        Ok(tensor)
    }
}

impl EmbeddingModel for FacenetEmbedder {
    fn input_size(&self) -> u32 {
        FACENET_INPUT_SIZE as u32
    }

    fn embed(&mut self, face: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = Self::preprocess(face)?;
        let phase_train = arr0(false);

        let outputs = self.session.run(ort::inputs![
            FACENET_INPUT => TensorRef::from_array_view(input.view())?,
            FACENET_PHASE_TRAIN => TensorRef::from_array_view(phase_train.view())?
        ])?;

        let (_, raw) = outputs[FACENET_OUTPUT]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw.len() != EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding::new(raw.to_vec()))
    }
}
