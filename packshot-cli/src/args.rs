//! Command-line argument definitions for packshot.

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Batch crop, resize and compose product shots.
///
/// Image files directly inside the input directory are cropped around the detected product and
/// exported for every output profile. Each sub-folder is combined into one layout per profile.
#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct BatchArgs {
    /// Output profiles JSON (profile key -> sizes, formats, padding).
    #[arg(long, default_value = "output_profiles.json")]
    pub cfg: PathBuf,

    /// Optional settings JSON. Defaults to `config/settings.json` when present, otherwise
    /// built-in parameters.
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Input root directory.
    #[arg(long, default_value = "input")]
    pub input_dir: PathBuf,

    /// Output root directory.
    #[arg(long, default_value = "output")]
    pub out_dir: PathBuf,

    /// Path to the ONNX detection model (defaults to the settings file's `model_path`).
    #[arg(short, long)]
    pub model: Option<PathBuf>,

    /// Padding in pixels around the detected region.
    #[arg(long)]
    pub pad: Option<u32>,

    /// Detection confidence threshold (0-1).
    #[arg(long)]
    pub conf: Option<f32>,

    /// NMS IoU threshold (0-1).
    #[arg(long = "iou-thres")]
    pub iou_thres: Option<f32>,

    /// Minimum box area in source pixels.
    #[arg(long)]
    pub min_area: Option<f32>,

    /// Maximum box area in source pixels.
    #[arg(long)]
    pub max_area: Option<f32>,

    /// Minimum box aspect ratio (width / height).
    #[arg(long)]
    pub min_aspect: Option<f32>,

    /// Maximum box aspect ratio (width / height).
    #[arg(long)]
    pub max_aspect: Option<f32>,

    /// Write `debug_<name>.jpg` images with the chosen region outlined.
    #[arg(long, action = ArgAction::SetTrue)]
    pub debug: bool,

    /// Enable telemetry timing logs (defaults to settings file).
    #[arg(long, action = ArgAction::SetTrue)]
    pub telemetry: bool,

    /// Override telemetry logging level (error, warn, info, debug, trace).
    #[arg(long, value_name = "LEVEL")]
    pub telemetry_level: Option<String>,
}
