//! 68-point facial landmark fitting via ONNX Runtime.
//!
//! Each detected face is cropped to a square with a small margin, resized to
//! the network input and regressed to normalized (x, y) coordinates, which
//! are mapped back into image space.

use crate::types::{FaceRegion, LandmarkSet, LANDMARK_COUNT};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const LANDMARK_INPUT_SIZE: u32 = 112;
/// Extra context added on each side of the face box, as a fraction of its size.
const CROP_MARGIN: f32 = 0.1;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Landmark-fitting capability.
///
/// Returns one set per region, in region order. A set shorter than 68 points
/// marks a face the fitter could not handle; an `Err` means the whole call
/// failed.
pub trait LandmarkFitter {
    fn fit(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<LandmarkSet>, LandmarkError>;
}

/// Square window of the source image fed to the landmark network.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropWindow {
    x: f32,
    y: f32,
    side: f32,
}

impl CropWindow {
    fn around(region: &FaceRegion) -> Self {
        let (cx, cy) = region.center();
        let side = region.width.max(region.height) * (1.0 + 2.0 * CROP_MARGIN);
        Self {
            x: cx - side / 2.0,
            y: cy - side / 2.0,
            side,
        }
    }

    /// Map normalized [0, 1] crop coordinates back to the source image.
    fn to_image(&self, nx: f32, ny: f32) -> (f32, f32) {
        (self.x + nx * self.side, self.y + ny * self.side)
    }

    /// Cut the window out of `image`; parts outside the image are black.
    fn extract(&self, image: &RgbImage) -> Option<RgbImage> {
        let side = self.side.round() as i64;
        if side < 1 {
            return None;
        }
        let x0 = self.x.round() as i64;
        let y0 = self.y.round() as i64;
        let (w, h) = (image.width() as i64, image.height() as i64);

        let mut patch = RgbImage::new(side as u32, side as u32);
        for py in 0..side {
            let sy = y0 + py;
            if sy < 0 || sy >= h {
                continue;
            }
            for px in 0..side {
                let sx = x0 + px;
                if sx < 0 || sx >= w {
                    continue;
                }
                patch.put_pixel(px as u32, py as u32, *image.get_pixel(sx as u32, sy as u32));
            }
        }
        Some(patch)
    }
}

/// Landmark regressor producing 68 normalized (x, y) pairs per face.
pub struct OnnxLandmarkFitter {
    session: Session,
    input_size: u32,
}

impl OnnxLandmarkFitter {
    pub fn load(model_path: &str) -> Result<Self, LandmarkError> {
        if !Path::new(model_path).exists() {
            return Err(LandmarkError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded landmark model"
        );

        Ok(Self {
            session,
            input_size: LANDMARK_INPUT_SIZE,
        })
    }

    /// NCHW RGB tensor scaled to [0, 1].
    fn preprocess(&self, patch: &RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = imageops::resize(patch, size, size, FilterType::Triangle);
        let mut tensor = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        tensor
    }

    fn fit_one(
        &mut self,
        image: &RgbImage,
        region: &FaceRegion,
    ) -> Result<LandmarkSet, LandmarkError> {
        let window = CropWindow::around(region);
        let Some(patch) = window.extract(image) else {
            return Ok(LandmarkSet::default());
        };
        let input = self.preprocess(&patch);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| LandmarkError::InferenceFailed(format!("landmark extraction: {e}")))?;

        Ok(decode_landmarks(raw, &window))
    }
}

/// Interpret a flat `[x0, y0, x1, y1, ...]` output as normalized crop
/// coordinates. Values past the 68th point are ignored.
fn decode_landmarks(raw: &[f32], window: &CropWindow) -> LandmarkSet {
    let used = raw.len().min(LANDMARK_COUNT * 2);
    let points = raw[..used]
        .chunks_exact(2)
        .map(|p| window.to_image(p[0], p[1]))
        .collect();
    LandmarkSet::new(points)
}

impl LandmarkFitter for OnnxLandmarkFitter {
    fn fit(
        &mut self,
        image: &RgbImage,
        regions: &[FaceRegion],
    ) -> Result<Vec<LandmarkSet>, LandmarkError> {
        regions.iter().map(|r| self.fit_one(image, r)).collect()
    }
}
