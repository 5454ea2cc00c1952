//! Configuration loading and CLI override logic.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use packshot_utils::{
    config::{AppSettings, DEFAULT_MODEL_PATH, default_settings_path},
    normalize_path,
    profiles::ProfileSet,
};

use crate::args::BatchArgs;

/// Load application settings from a file or use defaults.
pub fn load_settings(settings_path: Option<&PathBuf>) -> Result<AppSettings> {
    if let Some(path) = settings_path {
        let resolved = normalize_path(path)?;
        let settings = AppSettings::load_from_path(&resolved)?;
        info!("Loaded settings from {}", resolved.display());
        Ok(settings)
    } else {
        let default_path = default_settings_path();
        if default_path.exists() {
            let settings = AppSettings::load_from_path(&default_path).with_context(|| {
                format!(
                    "failed to load default settings from {}",
                    default_path.display()
                )
            })?;
            info!("Loaded settings from {}", default_path.display());
            Ok(settings)
        } else {
            Ok(AppSettings::default())
        }
    }
}

/// Load and validate the output profiles file.
pub fn load_profiles(path: &Path) -> Result<ProfileSet> {
    let resolved = normalize_path(path)
        .with_context(|| format!("output profiles file {} not found", path.display()))?;
    let profiles = ProfileSet::load_from_path(&resolved)?;
    if profiles.is_empty() {
        warn!("{} defines no output profiles", resolved.display());
    }
    info!(
        "Loaded {} output profile(s) from {}",
        profiles.len(),
        resolved.display()
    );
    Ok(profiles)
}

/// Apply command-line arguments to override loaded or default settings.
pub fn apply_cli_overrides(settings: &mut AppSettings, args: &BatchArgs) {
    if args.telemetry {
        settings.telemetry.enabled = true;
    }
    if let Some(level) = args.telemetry_level.as_ref() {
        let normalized = level.trim();
        if !normalized.is_empty() {
            let lower = normalized.to_ascii_lowercase();
            settings.telemetry.level = lower.clone();
            if lower == "off" {
                settings.telemetry.enabled = false;
            }
        }
    }

    if let Some(model) = args.model.as_ref() {
        settings.model_path = Some(model.display().to_string());
    }
    if let Some(pad) = args.pad {
        settings.output.default_pad = pad;
    }

    let detection = &mut settings.detection;
    if let Some(conf) = args.conf {
        detection.score_threshold = conf;
    }
    if let Some(iou) = args.iou_thres {
        detection.nms_threshold = iou;
    }
    if args.min_area.is_some() {
        detection.min_area = args.min_area;
    }
    if args.max_area.is_some() {
        detection.max_area = args.max_area;
    }
    if args.min_aspect.is_some() {
        detection.min_aspect = args.min_aspect;
    }
    if args.max_aspect.is_some() {
        detection.max_aspect = args.max_aspect;
    }
}

/// Model location after overrides.
pub fn model_path(settings: &AppSettings) -> PathBuf {
    PathBuf::from(
        settings
            .model_path
            .as_deref()
            .unwrap_or(DEFAULT_MODEL_PATH),
    )
}
