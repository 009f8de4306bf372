//! Face alignment from 68-point landmarks.
//!
//! Estimates head pose from six landmark/model correspondences, rotates the
//! image about the nose tip to cancel the head's in-plane roll, crops the
//! detected face region and resizes it to the embedding network input.

use crate::face_model::FaceModel3d;
use crate::pose::{self, CameraIntrinsics, HeadPose, PoseError};
use crate::types::{FaceRegion, LandmarkSet, LANDMARK_COUNT};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

/// Side length of the aligned crop fed to FaceNet.
pub const ALIGNED_SIZE: u32 = 160;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("landmark set has {0} points, alignment needs {LANDMARK_COUNT}")]
    IncompleteLandmarks(usize),
    #[error("head pose estimation failed: {0}")]
    Pose(#[from] PoseError),
    #[error("face region is empty after rotation")]
    EmptyCrop,
}

/// A face rotated upright and cropped to a fixed size.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub image: RgbImage,
    pub roll_degrees: f64,
    pub pose: HeadPose,
}

/// 2×3 affine matrix rotating by `angle_deg` (counter-clockwise on screen)
/// about `center`, scaled by `scale`.
///
/// Returns [a, b, tx, c, d, ty] representing the matrix:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
pub fn rotation_matrix_2d(center: (f64, f64), angle_deg: f64, scale: f64) -> [f64; 6] {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let alpha = scale * cos;
    let beta = scale * sin;
    let (cx, cy) = center;
    [
        alpha,
        beta,
        (1.0 - alpha) * cx - beta * cy,
        -beta,
        alpha,
        beta * cx + (1.0 - alpha) * cy,
    ]
}

/// Apply a 2×3 affine matrix to a point.
pub fn transform_point(m: &[f64; 6], p: (f64, f64)) -> (f64, f64) {
    (
        m[0] * p.0 + m[1] * p.1 + m[2],
        m[3] * p.0 + m[4] * p.1 + m[5],
    )
}

/// Size of the axis-aligned bounding box of a `width`×`height` rectangle
/// rotated by `angle_deg` about `center`.
fn rotated_extent(center: (f64, f64), width: u32, height: u32, angle_deg: f64) -> (u32, u32) {
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let hw = width as f64 / 2.0;
    let hh = height as f64 / 2.0;

    let mut min = (f64::INFINITY, f64::INFINITY);
    let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (dx, dy) in [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)] {
        let x = center.0 + dx * cos - dy * sin;
        let y = center.1 + dx * sin + dy * cos;
        min = (min.0.min(x), min.1.min(y));
        max = (max.0.max(x), max.1.max(y));
    }

    let w = max.0.ceil() - min.0.floor() + 1.0;
    let h = max.1.ceil() - min.1.floor() + 1.0;
    (w.max(0.0) as u32, h.max(0.0) as u32)
}

/// Warp `src` by `matrix` and return the `width`×`height` window of the
/// output whose top-left corner is at (`x0`, `y0`).
///
/// Uses inverse mapping with bilinear interpolation. Pixels mapping outside
/// the source are black.
fn warp_region(
    src: &RgbImage,
    matrix: &[f64; 6],
    x0: u32,
    y0: u32,
    width: u32,
    height: u32,
) -> RgbImage {
    let [a, b, tx, c, d, ty] = *matrix;
    let det = a * d - b * c;
    let mut out = RgbImage::new(width, height);
    if det.abs() < 1e-12 {
        return out;
    }
    let (ia, ib, ic, id) = (d / det, -b / det, -c / det, a / det);

    let (sw, sh) = (src.width() as i64, src.height() as i64);
    let sample = |x: i64, y: i64, ch: usize| -> f64 {
        if x >= 0 && x < sw && y >= 0 && y < sh {
            src.get_pixel(x as u32, y as u32)[ch] as f64
        } else {
            0.0
        }
    };

    for oy in 0..height {
        for ox in 0..width {
            let dx = (x0 + ox) as f64 - tx;
            let dy = (y0 + oy) as f64 - ty;
            let sx = ia * dx + ib * dy;
            let sy = ic * dx + id * dy;

            let xf = sx.floor();
            let yf = sy.floor();
            let fx = sx - xf;
            let fy = sy - yf;
            let (x0s, y0s) = (xf as i64, yf as i64);

            let mut px = [0u8; 3];
            for (ch, value) in px.iter_mut().enumerate() {
                let v = sample(x0s, y0s, ch) * (1.0 - fx) * (1.0 - fy)
                    + sample(x0s + 1, y0s, ch) * fx * (1.0 - fy)
                    + sample(x0s, y0s + 1, ch) * (1.0 - fx) * fy
                    + sample(x0s + 1, y0s + 1, ch) * fx * fy;
                *value = v.round().clamp(0.0, 255.0) as u8;
            }
            out.put_pixel(ox, oy, Rgb(px));
        }
    }

    out
}

/// Rotate the face upright about the anchor landmark and crop it to
/// `out_size`×`out_size`.
///
/// `landmarks` and `face` must be in `image` coordinates. Fails without
/// touching the image when the landmark set is not complete.
pub fn align_face(
    image: &RgbImage,
    landmarks: &LandmarkSet,
    face: &FaceRegion,
    model: &FaceModel3d,
    out_size: u32,
) -> Result<AlignedFace, AlignError> {
    if !landmarks.is_complete() {
        return Err(AlignError::IncompleteLandmarks(landmarks.len()));
    }

    let image_points = model
        .image_points(landmarks)
        .ok_or(AlignError::IncompleteLandmarks(landmarks.len()))?;
    let camera = CameraIntrinsics::from_image_size(image.width(), image.height());
    let pose = pose::solve_pnp(&model.model_points(), &image_points, &camera)?;
    let roll = pose.roll_degrees();

    let (ax, ay) = landmarks
        .get(model.anchor_landmark())
        .ok_or(AlignError::IncompleteLandmarks(landmarks.len()))?;
    let center = (ax as f64, ay as f64);
    let matrix = rotation_matrix_2d(center, roll, 1.0);
    let (canvas_w, canvas_h) = rotated_extent(center, image.width(), image.height(), roll);

    // Clamp the face rectangle to the rotated canvas.
    let left = (face.x.round() as i64).max(0);
    let top = (face.y.round() as i64).max(0);
    let right = ((face.x + face.width).round() as i64).min(canvas_w as i64);
    let bottom = ((face.y + face.height).round() as i64).min(canvas_h as i64);
    if right <= left || bottom <= top {
        return Err(AlignError::EmptyCrop);
    }

    let crop = warp_region(
        image,
        &matrix,
        left as u32,
        top as u32,
        (right - left) as u32,
        (bottom - top) as u32,
    );
    let aligned = imageops::resize(&crop, out_size, out_size, FilterType::Triangle);

    tracing::debug!(
        roll_degrees = roll,
        rms = pose.reprojection_rms,
        crop_w = crop.width(),
        crop_h = crop.height(),
        "aligned face"
    );

    Ok(AlignedFace {
        image: aligned,
        roll_degrees: roll,
        pose,
    })
}
