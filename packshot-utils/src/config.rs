//! Persisted application settings shared by the pipeline and the CLI.
//!
//! Profile definitions live in their own file (see [`crate::profiles`]); this module covers the
//! detector, output naming, layout and telemetry knobs that are tuned per deployment.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

/// Detection thresholds and geometric filters applied after inference.
///
/// The filters are deployment configuration rather than constants: `min_area` and the
/// aspect bounds mirror the batch tool's command-line flags.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimum objectness for a detection to be kept.
    pub score_threshold: f32,
    /// IoU above which a lower-scoring box of the same class is suppressed.
    pub nms_threshold: f32,
    /// Maximum number of candidates entering NMS (0 disables the cap).
    pub top_k: usize,
    /// Minimum box area in source pixels.
    pub min_area: Option<f32>,
    /// Maximum box area in source pixels.
    pub max_area: Option<f32>,
    /// Minimum `width / height`.
    pub min_aspect: Option<f32>,
    /// Maximum `width / height`.
    pub max_aspect: Option<f32>,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            score_threshold: 0.25,
            nms_threshold: 0.45,
            top_k: 300,
            min_area: None,
            max_area: None,
            min_aspect: None,
            max_aspect: None,
        }
    }
}

/// Resize filter preference used when building the model input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResizeQuality {
    /// Triangle filter.
    #[default]
    Quality,
    /// Nearest filter.
    Speed,
}

impl fmt::Display for ResizeQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResizeQuality::Quality => "quality",
            ResizeQuality::Speed => "speed",
        })
    }
}

impl FromStr for ResizeQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quality" => Ok(ResizeQuality::Quality),
            "speed" => Ok(ResizeQuality::Speed),
            other => Err(format!(
                "invalid resize quality '{other}'; expected 'quality' or 'speed'"
            )),
        }
    }
}

/// Model input resolution. Detection models in this project take a square input.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InputDimensions {
    pub width: u32,
    pub height: u32,
    pub resize_quality: ResizeQuality,
}

impl Default for InputDimensions {
    fn default() -> Self {
        Self {
            width: 640,
            height: 640,
            resize_quality: ResizeQuality::Quality,
        }
    }
}

/// Naming and encoder options for exported artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    /// Separator placed between the item identifier and the size tag in file names.
    pub separator: String,
    /// Margin in pixels added around detected regions before composition.
    pub default_pad: u32,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// PNG compression strategy ("fast", "default", "best") or numeric level (0-9).
    pub png_compression: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            separator: "_".to_string(),
            default_pad: 40,
            jpeg_quality: 90,
            png_compression: "default".to_string(),
        }
    }
}

/// Grid used when several images are combined onto one canvas.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LayoutPattern {
    /// Gap between cells in pixels.
    pub gutter: u32,
    /// Canvas background as a color spec (`#rrggbb`, `white`, `transparent`, ...).
    pub background: String,
    /// Images per row, keyed by the number of images in the layout.
    pub rows: BTreeMap<String, Vec<u32>>,
}

impl Default for LayoutPattern {
    fn default() -> Self {
        Self {
            gutter: 0,
            background: "#000000".to_string(),
            rows: BTreeMap::new(),
        }
    }
}

impl LayoutPattern {
    /// Row pattern configured for `count` images, if any.
    pub fn rows_for(&self, count: usize) -> Option<&[u32]> {
        self.rows.get(&count.to_string()).map(Vec::as_slice)
    }
}

/// Canvas orientation, used to pick a [`LayoutPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Vertical,
    Horizontal,
    Square,
}

impl Orientation {
    pub fn of(width: u32, height: u32) -> Self {
        if height > width {
            Orientation::Vertical
        } else if width > height {
            Orientation::Horizontal
        } else {
            Orientation::Square
        }
    }
}

/// Layout patterns per canvas orientation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct LayoutSettings {
    pub vertical: LayoutPattern,
    pub horizontal: LayoutPattern,
    pub square: LayoutPattern,
}

impl LayoutSettings {
    pub fn pattern_for(&self, width: u32, height: u32) -> &LayoutPattern {
        match Orientation::of(width, height) {
            Orientation::Vertical => &self.vertical,
            Orientation::Horizontal => &self.horizontal,
            Orientation::Square => &self.square,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelemetrySettings {
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::Off,
            "error" => LevelFilter::Error,
            "warn" | "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "trace" => LevelFilter::Trace,
            _ => LevelFilter::Debug,
        }
    }
}

/// Persistent settings consumed by the pipeline entry points.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    /// Path to the ONNX detection model.
    pub model_path: Option<String>,
    pub input: InputDimensions,
    pub detection: DetectionSettings,
    pub output: OutputSettings,
    pub layout: LayoutSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            model_path: Some(DEFAULT_MODEL_PATH.into()),
            input: InputDimensions::default(),
            detection: DetectionSettings::default(),
            output: OutputSettings::default(),
            layout: LayoutSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Model location used when the settings file does not name one.
pub const DEFAULT_MODEL_PATH: &str = "models/product_detector_640.onnx";

impl AppSettings {
    /// Load settings from a JSON file, filling missing sections with defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let mut settings: AppSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;

        if settings.model_path.is_none() {
            settings.model_path = Some(DEFAULT_MODEL_PATH.into());
        }
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting any existing file.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }
}

/// Returns the default settings location (`config/settings.json` under the working directory).
pub fn default_settings_path() -> PathBuf {
    env::current_dir()
        .map(|dir| dir.join("config/settings.json"))
        .unwrap_or_else(|_| PathBuf::from("config/settings.json"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let settings = AppSettings::default();
        settings.save_to_path(file.path()).expect("save");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded, settings);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "detection": { "score_threshold": 0.5, "min_area": 5000 },
            "layout": { "square": { "gutter": 8, "rows": { "3": [1, 2] } } }
        }"#;
        fs::write(file.path(), json).expect("write settings");

        let loaded = AppSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.detection.score_threshold, 0.5);
        assert_eq!(loaded.detection.nms_threshold, 0.45);
        assert_eq!(loaded.detection.min_area, Some(5000.0));
        assert_eq!(loaded.detection.max_aspect, None);
        assert_eq!(loaded.model_path.as_deref(), Some(DEFAULT_MODEL_PATH));
        assert_eq!(loaded.output.separator, "_");

        let pattern = loaded.layout.pattern_for(500, 500);
        assert_eq!(pattern.gutter, 8);
        assert_eq!(pattern.rows_for(3), Some(&[1, 2][..]));
        assert_eq!(pattern.rows_for(4), None);
    }

    #[test]
    fn orientation_follows_canvas_shape() {
        assert_eq!(Orientation::of(300, 600), Orientation::Vertical);
        assert_eq!(Orientation::of(600, 300), Orientation::Horizontal);
        assert_eq!(Orientation::of(400, 400), Orientation::Square);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "warning".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);
    }
}
