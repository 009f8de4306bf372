use crate::cli::Cli;
use anyhow::{Context, Result};
use facerec_core::{FaceModel3d, PipelineConfig, DEFAULT_MATCH_THRESHOLD};
use std::path::{Path, PathBuf};

/// Runtime configuration: `FACEREC_*` environment variables, overridden by
/// command-line flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Squared-distance threshold for a positive match.
    pub threshold: f32,
    /// Frames are shrunk by this factor before detection.
    pub detection_scale: f32,
    /// Optional TOML correspondence table replacing the built-in face model.
    pub face_model: Option<PathBuf>,
    pub show_crop: bool,
    /// Open windows; off for headless runs.
    pub display: bool,
}

impl Config {
    /// Load configuration from `FACEREC_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = var("FACEREC_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| default_model_dir(&var));

        Self {
            camera_device: var("FACEREC_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            model_dir,
            threshold: parse_or(var("FACEREC_THRESHOLD"), DEFAULT_MATCH_THRESHOLD),
            detection_scale: parse_or(var("FACEREC_SCALE"), 1.0),
            face_model: None,
            show_crop: false,
            display: true,
        }
    }

    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(device) = &cli.camera {
            self.camera_device = device.clone();
        }
        if let Some(dir) = &cli.model_dir {
            self.model_dir = dir.clone();
        }
        if let Some(thresh) = cli.thresh {
            self.threshold = thresh;
        }
        if let Some(scale) = cli.scale {
            self.detection_scale = scale;
        }
        if cli.face_model.is_some() {
            self.face_model = cli.face_model.clone();
        }
        self.show_crop |= cli.show_crop;
        self.display &= !cli.no_display;
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_file("det_10g.onnx")
    }

    /// Path to the 68-point landmark model.
    pub fn landmark_model_path(&self) -> String {
        self.model_file("landmarks_68.onnx")
    }

    /// Path to the FaceNet embedding model.
    pub fn embedder_model_path(&self) -> String {
        self.model_file("facenet.onnx")
    }

    fn model_file(&self, name: &str) -> String {
        self.model_dir.join(name).to_string_lossy().into_owned()
    }

    /// Pipeline settings, loading the face model table if one was given.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        let face_model = match &self.face_model {
            Some(path) => load_face_model(path)?,
            None => FaceModel3d::default(),
        };
        Ok(PipelineConfig {
            threshold: self.threshold,
            detection_scale: self.detection_scale,
            face_model,
            keep_crops: self.show_crop && self.display,
            ..PipelineConfig::default()
        })
    }
}

fn load_face_model(path: &Path) -> Result<FaceModel3d> {
    FaceModel3d::load(path).with_context(|| format!("loading face model {}", path.display()))
}

fn default_model_dir(var: &impl Fn(&str) -> Option<String>) -> PathBuf {
    var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facerec/models")
}

fn parse_or(value: Option<String>, default: f32) -> f32 {
    value
        .and_then(|v| v.parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("HOME", "/home/ada")]);
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.model_dir, PathBuf::from("/home/ada/.local/share/facerec/models"));
        assert_eq!(config.threshold, 0.045);
        assert_eq!(config.detection_scale, 1.0);
        assert!(config.display);
        assert!(!config.show_crop);
        assert_eq!(
            config.detector_model_path(),
            "/home/ada/.local/share/facerec/models/det_10g.onnx"
        );
    }

    #[test]
    fn test_env_overrides() {
        let config = config_from(&[
            ("XDG_DATA_HOME", "/data"),
            ("FACEREC_CAMERA_DEVICE", "/dev/video4"),
            ("FACEREC_THRESHOLD", "0.5"),
            ("FACEREC_SCALE", "not-a-number"),
        ]);
        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.model_dir, PathBuf::from("/data/facerec/models"));
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.detection_scale, 1.0);

        let config = config_from(&[("FACEREC_THRESHOLD", "NaN")]);
        assert_eq!(config.threshold, DEFAULT_MATCH_THRESHOLD);

        let config = config_from(&[("FACEREC_MODEL_DIR", "/opt/models")]);
        assert_eq!(config.embedder_model_path(), "/opt/models/facenet.onnx");
        assert_eq!(config.landmark_model_path(), "/opt/models/landmarks_68.onnx");
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = config_from(&[("FACEREC_THRESHOLD", "0.5"), ("FACEREC_SCALE", "2")]);
        let cli = Cli::parse_from(["facerec", "db.txt", "--thresh", "0.1", "--show-crop", "--no-display"]);
        config.apply_cli(&cli);

        assert_eq!(config.threshold, 0.1);
        assert_eq!(config.detection_scale, 2.0);
        assert!(config.show_crop);
        assert!(!config.display);

        let pipeline = config.pipeline_config().unwrap();
        assert_eq!(pipeline.threshold, 0.1);
        assert!(!pipeline.keep_crops);
    }

    #[test]
    fn test_face_model_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let mut model = FaceModel3d::default();
        model.points[0].point = [0.0, 1.0, 0.0];
        std::io::Write::write_all(&mut file, toml::to_string(&model).unwrap().as_bytes()).unwrap();

        let mut config = config_from(&[]);
        config.face_model = Some(file.path().to_path_buf());
        assert_eq!(config.pipeline_config().unwrap().face_model, model);

        config.face_model = Some(PathBuf::from("/nonexistent/model.toml"));
        assert!(config.pipeline_config().is_err());
    }
}
