use anyhow::{Context, Result};
use clap::Parser;
use facerec_core::annotate::annotate;
use facerec_core::{
    EmbeddingDatabase, FacenetEmbedder, FramePipeline, OnnxLandmarkFitter, ScrfdDetector,
};
use facerec_hw::Camera;
use std::path::Path;
use tracing_subscriber::EnvFilter;

mod capture;
mod cli;
mod config;
mod display;

use cli::Cli;
use config::Config;
use display::Display;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse_from(cli::normalize_args(std::env::args()));

    if cli.list_cameras {
        return list_cameras();
    }

    let Some(database_path) = cli.database.clone() else {
        println!("Provide your embeddings database");
        std::process::exit(-1);
    };

    let mut config = Config::from_env();
    config.apply_cli(&cli);
    tracing::debug!(?config, "configuration");

    run(&database_path, &config)
}

fn list_cameras() -> Result<()> {
    let devices: Vec<_> = Camera::list_devices()
        .into_iter()
        .map(|d| {
            serde_json::json!({
                "path": d.path,
                "name": d.name,
                "driver": d.driver,
                "bus": d.bus,
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&devices)?);
    Ok(())
}

fn run(database_path: &Path, config: &Config) -> Result<()> {
    let database = EmbeddingDatabase::load(database_path)
        .with_context(|| format!("loading embeddings database {}", database_path.display()))?;
    let pipeline_config = config.pipeline_config()?;

    // Fail fast: every model must load before the camera is touched.
    let detector_path = config.detector_model_path();
    let detector = ScrfdDetector::load(&detector_path)
        .with_context(|| format!("loading face detector {detector_path}"))?;
    let landmark_path = config.landmark_model_path();
    let fitter = OnnxLandmarkFitter::load(&landmark_path)
        .with_context(|| format!("loading landmark model {landmark_path}"))?;
    let embedder_path = config.embedder_model_path();
    let embedder = FacenetEmbedder::load(&embedder_path)
        .with_context(|| format!("loading FaceNet model {embedder_path}"))?;

    let mut pipeline = FramePipeline::new(detector, fitter, embedder, database, pipeline_config)?;

    let camera = match Camera::open(&config.camera_device) {
        Ok(camera) => camera,
        Err(e) => {
            tracing::error!(device = %config.camera_device, error = %e, "camera unavailable");
            println!("Could not Open Camera");
            return Ok(());
        }
    };
    let mut stream = match camera.stream() {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!(device = %config.camera_device, error = %e, "camera unavailable");
            println!("Could not Open Camera");
            return Ok(());
        }
    };

    let mut display = if config.display {
        Some(Display::open(camera.width, camera.height)?)
    } else {
        None
    };

    tracing::info!(
        device = %config.camera_device,
        width = camera.width,
        height = camera.height,
        format = ?camera.pixel_format(),
        identities = pipeline.database().len(),
        threshold = pipeline.config().threshold,
        "Face Detection Started...."
    );

    loop {
        let Some(frame) = capture::next_usable_frame(&mut stream) else {
            break;
        };
        let mut image = frame.image;

        match pipeline.process_frame(&image) {
            Ok(report) => {
                annotate(&mut image, &report);
                if let Some(display) = display.as_mut() {
                    display.show_crops(report.crops())?;
                }
            }
            Err(e) => tracing::warn!(seq = frame.sequence, error = %e, "frame skipped"),
        }

        if let Some(display) = display.as_mut() {
            display.show_frame(&image)?;
            if display.should_close() {
                break;
            }
        }
    }

    tracing::info!("shutting down");
    Ok(())
}
