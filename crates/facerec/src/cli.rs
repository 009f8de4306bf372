use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "facerec",
    about = "Real-time face recognition against an embeddings database"
)]
pub struct Cli {
    /// Embeddings database, one `label f1 ... f512` line per identity
    pub database: Option<PathBuf>,

    /// Show each aligned face crop in its own window (also `-show_crop`)
    #[arg(long)]
    pub show_crop: bool,

    /// Squared-distance threshold for a match (also `-thresh`)
    #[arg(long, allow_negative_numbers = true, value_parser = parse_finite)]
    pub thresh: Option<f32>,

    /// V4L2 capture device (default: $FACEREC_CAMERA_DEVICE or /dev/video0)
    #[arg(long)]
    pub camera: Option<String>,

    /// Directory holding det_10g.onnx, landmarks_68.onnx and facenet.onnx
    #[arg(long)]
    pub model_dir: Option<PathBuf>,

    /// Shrink frames by this factor before detection
    #[arg(long, value_parser = parse_finite)]
    pub scale: Option<f32>,

    /// TOML table of landmark/3-D model correspondences
    #[arg(long)]
    pub face_model: Option<PathBuf>,

    /// Print available capture devices as JSON and exit
    #[arg(long)]
    pub list_cameras: bool,

    /// Run without windows until the camera stops
    #[arg(long)]
    pub no_display: bool,
}

pub const THRESH_NOTICE: &str = "No threshold given, keeps 0.045 default";

/// Parse a finite `f32`; `nan` and `inf` are rejected.
pub fn parse_finite(s: &str) -> Result<f32, String> {
    match s.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok(v),
        Ok(_) => Err(format!("{s} is not a finite number")),
        Err(e) => Err(e.to_string()),
    }
}

/// Rewrite the single-dash flags `-show_crop` and `-thresh <value>` into
/// their clap spellings.
///
/// A `-thresh` without a finite numeric value is dropped with a notice,
/// leaving the default threshold in place. A bad value is dropped along with
/// it unless it looks like another flag.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out = Vec::new();
    let mut args = args.into_iter().peekable();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-show_crop" => out.push("--show-crop".to_string()),
            "-thresh" => match args.peek().map(|v| (v.parse::<f32>(), v.starts_with('-'))) {
                Some((Ok(value), _)) if value.is_finite() => {
                    args.next();
                    out.push(format!("--thresh={value}"));
                }
                Some((parsed, looks_like_flag)) => {
                    if parsed.is_ok() || !looks_like_flag {
                        args.next();
                    }
                    println!("{THRESH_NOTICE}");
                }
                None => println!("{THRESH_NOTICE}"),
            },
            _ => out.push(arg),
        }
    }

    out
}
