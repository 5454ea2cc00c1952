//! Common helpers shared across packshot crates.

/// Colors for canvas backgrounds and padding.
pub mod color;
/// Application settings (`settings.json`).
pub mod config;
/// Image loading, letterboxing, and tensor layout conversion.
pub mod image_utils;
/// Raster encoders, artifact naming and file writing.
pub mod output;
/// Output profile definitions (`output_profiles.json`).
pub mod profiles;
/// Layered document (PSD) writer.
pub mod psd;
/// Instrumentation helpers for optional performance tracing.
pub mod telemetry;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::LevelFilter;

pub use color::{RgbaColor, parse_color_spec, parse_hex_color};
pub use config::{
    AppSettings, DetectionSettings, InputDimensions, LayoutPattern, LayoutSettings, Orientation,
    OutputSettings, ResizeQuality, TelemetrySettings,
};
pub use image_utils::{
    LetterboxTransform, decode_image, filter_for, letterbox_image, load_image, rgb_to_chw,
};
pub use output::{
    EncodeOptions, PngCompression, RasterFormat, document_file_name, encode_raster,
    sized_file_name, write_bytes,
};
pub use profiles::{OutputFormat, OutputProfile, PadColor, ProfileSet, TargetSize};
pub use psd::{MaskRect, PsdDocument, PsdLayer};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, configure_from_settings, telemetry_allows,
    telemetry_enabled, timing_guard,
};

/// Initialize logging once for the CLI and tests.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. The telemetry target is always
/// let through so [`timing_guard`] output is governed by the telemetry settings alone.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module(telemetry::TELEMETRY_TARGET, LevelFilter::Trace);

    // A second initialization (tests, embedding) is not an error.
    let _ = builder.try_init();
    Ok(())
}

/// Validate that a path exists and resolve it to an absolute path.
pub fn normalize_path<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    anyhow::ensure!(path.exists(), "path does not exist: {}", path.display());
    Ok(path.canonicalize()?)
}
