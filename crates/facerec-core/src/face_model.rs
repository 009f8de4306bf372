//! Landmark ↔ 3-D model correspondences used for head pose estimation.
//!
//! The built-in table pairs six iBUG-68 landmarks with an average human face
//! (units are arbitrary, nose tip at the origin, y up). Alternate tables can
//! be loaded from TOML:
//!
//! ```toml
//! [[points]]
//! name = "nose tip"
//! landmark = 30
//! point = [0.0, 0.0, 0.0]
//! anchor = true
//! ```

use crate::types::{LandmarkSet, LANDMARK_COUNT};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

const MIN_POINTS: usize = 6;

#[derive(Error, Debug)]
pub enum FaceModelError {
    #[error("failed to read face model {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("bad face model TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("face model needs at least {MIN_POINTS} points, got {0}")]
    TooFewPoints(usize),
    #[error("face model needs exactly one anchor point, got {0}")]
    AnchorCount(usize),
    #[error("landmark index {0} out of range (0..{LANDMARK_COUNT})")]
    LandmarkOutOfRange(usize),
}

/// One landmark index paired with its position on the 3-D face model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub name: String,
    pub landmark: usize,
    pub point: [f64; 3],
    /// The point the aligned image is rotated about.
    #[serde(default)]
    pub anchor: bool,
}

/// Static correspondence table for pose estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceModel3d {
    pub points: Vec<Correspondence>,
}

/// (name, landmark index, model point, anchor)
const DEFAULT_TABLE: [(&str, usize, [f64; 3], bool); 6] = [
    ("nose tip", 30, [0.0, 0.0, 0.0], true),
    ("chin", 8, [0.0, -330.0, -65.0], false),
    ("left eye left corner", 45, [-225.0, 170.0, -135.0], false),
    ("right eye right corner", 36, [225.0, 170.0, -135.0], false),
    ("left mouth corner", 54, [-150.0, -150.0, -125.0], false),
    ("right mouth corner", 48, [150.0, -150.0, -125.0], false),
];

impl Default for FaceModel3d {
    fn default() -> Self {
        Self {
            points: DEFAULT_TABLE
                .iter()
                .map(|&(name, landmark, point, anchor)| Correspondence {
                    name: name.to_string(),
                    landmark,
                    point,
                    anchor,
                })
                .collect(),
        }
    }
}

impl FaceModel3d {
    pub fn from_toml_str(src: &str) -> Result<Self, FaceModelError> {
        let model: Self = toml::from_str(src)?;
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, FaceModelError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| FaceModelError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let model = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), points = model.points.len(), "loaded face model");
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), FaceModelError> {
        if self.points.len() < MIN_POINTS {
            return Err(FaceModelError::TooFewPoints(self.points.len()));
        }
        let anchors = self.points.iter().filter(|c| c.anchor).count();
        if anchors != 1 {
            return Err(FaceModelError::AnchorCount(anchors));
        }
        if let Some(c) = self.points.iter().find(|c| c.landmark >= LANDMARK_COUNT) {
            return Err(FaceModelError::LandmarkOutOfRange(c.landmark));
        }
        Ok(())
    }

    /// Landmark index of the rotation anchor.
    pub fn anchor_landmark(&self) -> usize {
        self.points
            .iter()
            .find(|c| c.anchor)
            .map(|c| c.landmark)
            .unwrap_or(DEFAULT_TABLE[0].1)
    }

    pub fn model_points(&self) -> Vec<[f64; 3]> {
        self.points.iter().map(|c| c.point).collect()
    }

    /// Image points for each correspondence, or `None` if a landmark is missing.
    pub fn image_points(&self, landmarks: &LandmarkSet) -> Option<Vec<(f64, f64)>> {
        self.points
            .iter()
            .map(|c| landmarks.get(c.landmark).map(|(x, y)| (x as f64, y as f64)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model_is_valid() {
        let model = FaceModel3d::default();
        model.validate().unwrap();
        assert_eq!(model.anchor_landmark(), 30);
        assert_eq!(model.model_points()[1], [0.0, -330.0, -65.0]);
    }

    #[test]
    fn test_toml_roundtrip_of_default() {
        let model = FaceModel3d::default();
        let src = toml::to_string(&model).unwrap();
        assert_eq!(FaceModel3d::from_toml_str(&src).unwrap(), model);
    }

    #[test]
    fn test_toml_custom_anchor() {
        let mut src = String::new();
        for (i, lm) in [8usize, 30, 36, 45, 48, 54].iter().enumerate() {
            src.push_str(&format!(
                "[[points]]\nname = \"p{i}\"\nlandmark = {lm}\npoint = [{i}.0, 1.0, 2.0]\nanchor = {}\n\n",
                *lm == 8
            ));
        }
        let model = FaceModel3d::from_toml_str(&src).unwrap();
        assert_eq!(model.anchor_landmark(), 8);
        assert_eq!(model.points.len(), 6);
    }

    #[test]
    fn test_rejects_missing_anchor() {
        let mut model = FaceModel3d::default();
        model.points[0].anchor = false;
        assert!(matches!(model.validate(), Err(FaceModelError::AnchorCount(0))));
    }

    #[test]
    fn test_rejects_too_few_points() {
        let mut model = FaceModel3d::default();
        model.points.truncate(5);
        assert!(matches!(model.validate(), Err(FaceModelError::TooFewPoints(5))));
    }

    #[test]
    fn test_rejects_out_of_range_landmark() {
        let mut model = FaceModel3d::default();
        model.points[2].landmark = 68;
        assert!(matches!(model.validate(), Err(FaceModelError::LandmarkOutOfRange(68))));
    }

    #[test]
    fn test_image_points_follow_table_order() {
        let points: Vec<(f32, f32)> = (0..LANDMARK_COUNT).map(|i| (i as f32, 0.0)).collect();
        let landmarks = LandmarkSet::new(points);
        let image = FaceModel3d::default().image_points(&landmarks).unwrap();
        let xs: Vec<f64> = image.iter().map(|p| p.0).collect();
        assert_eq!(xs, vec![30.0, 8.0, 45.0, 36.0, 54.0, 48.0]);

        let partial = LandmarkSet::new(vec![(0.0, 0.0); 40]);
        assert!(FaceModel3d::default().image_points(&partial).is_none());
    }
}
