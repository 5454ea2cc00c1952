//! Fans one edited region out across profiles and formats, writing through a [`Destination`].
//!
//! One export *unit* is a (profile, format) pair: a raster unit writes one file per rendered size,
//! a document unit writes one layered file. A profile with `export_psd` set gets a document unit
//! even when `psd` is not among its formats. Failures are collected as strings; only a missing
//! destination or a write error cuts a profile short.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use packshot_utils::{
    config::OutputSettings,
    output::{
        EncodeOptions, RasterFormat, document_file_name, encode_raster, sized_file_name,
        write_bytes,
    },
    profiles::{OutputFormat, OutputProfile, ProfileSet},
    timing_guard,
};

use crate::compose::{ComposePayload, Composition, Compositor, DOCUMENT_STEP, ProgressReporter};
use crate::error::PipelineError;
use crate::region::Region;

/// Writable output location, addressed per profile.
pub trait Destination: Send {
    /// Whether files for `profile_key` can be written right now.
    fn is_available(&self, profile_key: &str) -> bool;

    /// Store one artifact; returns a human-readable location.
    fn write(&mut self, profile_key: &str, file_name: &str, bytes: &[u8]) -> Result<String>;
}

/// Writes artifacts to `<root>/<profile_key>/<file_name>`.
#[derive(Debug, Clone)]
pub struct DirectoryDestination {
    root: PathBuf,
}

impl DirectoryDestination {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed.
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create output directory {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Destination for DirectoryDestination {
    fn is_available(&self, _profile_key: &str) -> bool {
        self.root.is_dir()
    }

    fn write(&mut self, profile_key: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.root.join(profile_key).join(file_name);
        write_bytes(&path, bytes)?;
        Ok(path.display().to_string())
    }
}

/// Files written by one (profile, format) unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub profile_key: String,
    pub format: OutputFormat,
    pub files: Vec<String>,
}

/// Outcome of an export call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportResult {
    pub success: bool,
    pub errors: Vec<String>,
    pub artifacts: Vec<ExportArtifact>,
}

impl ExportResult {
    fn failed(error: String) -> Self {
        Self {
            success: false,
            errors: vec![error],
            artifacts: Vec::new(),
        }
    }
}

/// Naming and encoding parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub separator: String,
    pub encode: EncodeOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self::from_settings(&OutputSettings::default())
    }
}

impl ExportOptions {
    pub fn from_settings(settings: &OutputSettings) -> Self {
        Self {
            separator: settings.separator.clone(),
            encode: EncodeOptions::from_settings(settings),
        }
    }
}

/// Formats exported for `profile`, in order, with the document appended for `export_psd`.
pub fn export_formats(profile: &OutputProfile) -> Vec<OutputFormat> {
    let mut formats = profile.effective_formats();
    if profile.export_psd && !formats.contains(&OutputFormat::Psd) {
        formats.push(OutputFormat::Psd);
    }
    formats
}

/// Number of export units (and artifacts) a profile produces.
pub fn calculate_file_count(profile: &OutputProfile) -> usize {
    export_formats(profile).len()
}

pub fn calculate_total_file_count(profiles: &ProfileSet) -> usize {
    profiles
        .iter()
        .map(|(_, profile)| calculate_file_count(profile))
        .sum()
}

/// Multi-profile export coordinator.
pub struct Exporter {
    compositor: Compositor,
    options: ExportOptions,
}

/// A destination write failed; the rest of the profile is skipped.
struct WriteAborted(String);

/// Errors and progress accumulated across one profile's units.
struct UnitLog<'a> {
    errors: Vec<String>,
    progress: ProgressReporter<'a>,
}

impl Exporter {
    pub fn new(compositor: Compositor, options: ExportOptions) -> Self {
        Self {
            compositor,
            options,
        }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Export one profile. Fails fast, without composing, when the destination is unavailable.
    pub fn export_single_profile(
        &self,
        payload: &ComposePayload,
        profile: &OutputProfile,
        profile_key: &str,
        destination: &mut dyn Destination,
    ) -> ExportResult {
        if !destination.is_available(profile_key) {
            warn!("Skipping profile {profile_key}: destination unavailable");
            return ExportResult::failed(PipelineError::DestinationUnavailable.to_string());
        }
        let _guard = timing_guard(
            format!("packshot_core::export[{profile_key}]"),
            log::Level::Debug,
        );

        let formats = export_formats(profile);
        if formats.is_empty() {
            debug!("Profile {profile_key} has no formats; nothing to export");
            return ExportResult {
                success: true,
                ..ExportResult::default()
            };
        }

        let wants_document = formats.contains(&OutputFormat::Psd);
        let mut quiet = ProgressReporter::new(None, profile_key, 0);
        let composition = match self.compositor.render(
            payload,
            profile,
            profile_key,
            wants_document,
            &mut quiet,
        ) {
            Ok(composition) => composition,
            Err(err) => return ExportResult::failed(format!("{profile_key}: {err}")),
        };

        // One step per (size, raster format) file plus one per document.
        let raster_units = formats.iter().filter(|f| f.is_raster()).count();
        let total = composition.images.len() * raster_units + (formats.len() - raster_units);
        let mut tally = UnitLog {
            errors: composition
                .failures
                .iter()
                .map(|failure| format!("{profile_key}/{failure}"))
                .collect(),
            progress: ProgressReporter::new(self.compositor.progress(), profile_key, total),
        };

        let mut result = ExportResult::default();
        for format in formats {
            let unit = self.export_unit(
                &payload.item_id,
                profile_key,
                format,
                &composition,
                destination,
                &mut tally,
            );
            match unit {
                Ok(artifact) => result.artifacts.push(artifact),
                Err(WriteAborted(message)) => {
                    tally.errors.push(message);
                    break;
                }
            }
        }
        result.errors = tally.errors;

        result.success = result.errors.is_empty();
        info!(
            "Exported {} unit(s) for {profile_key}{}",
            result.artifacts.len(),
            if result.success { "" } else { " with errors" }
        );
        result
    }

    fn export_unit(
        &self,
        item_id: &str,
        profile_key: &str,
        format: OutputFormat,
        composition: &Composition,
        destination: &mut dyn Destination,
        tally: &mut UnitLog<'_>,
    ) -> Result<ExportArtifact, WriteAborted> {
        let mut artifact = ExportArtifact {
            profile_key: profile_key.to_string(),
            format,
            files: Vec::new(),
        };
        let separator = &self.options.separator;

        let raster = match format {
            OutputFormat::Jpg => RasterFormat::Jpeg,
            OutputFormat::Png => RasterFormat::Png,
            OutputFormat::Psd => {
                if let Some(bytes) = &composition.document {
                    let name = document_file_name(
                        item_id,
                        separator,
                        profile_key,
                        self.compositor.serializer().extension(),
                    );
                    artifact.files.push(write(destination, profile_key, &name, bytes)?);
                }
                tally.progress.advance(DOCUMENT_STEP);
                return Ok(artifact);
            }
        };

        for composed in &composition.images {
            let step = format!("{}.{}", composed.name, raster.extension());
            let bytes = match encode_raster(&composed.image, raster, &self.options.encode) {
                Ok(bytes) => bytes,
                Err(err) => {
                    tally.errors.push(format!("{profile_key}/{}: {err:#}", composed.name));
                    tally.progress.advance(step);
                    continue;
                }
            };
            let name = sized_file_name(
                item_id,
                separator,
                &composed.name,
                composed.width,
                composed.height,
                raster.extension(),
            );
            artifact.files.push(write(destination, profile_key, &name, &bytes)?);
            tally.progress.advance(step);
        }
        Ok(artifact)
    }

    /// Export every profile in mapping order. Distinct errors are kept in first-seen order.
    pub fn export_all_profiles(
        &self,
        payload: &ComposePayload,
        profiles: &ProfileSet,
        destination: &mut dyn Destination,
    ) -> ExportResult {
        let mut combined = ExportResult {
            success: true,
            ..ExportResult::default()
        };
        for (key, profile) in profiles.iter() {
            let result = self.export_single_profile(payload, profile, key, destination);
            combined.success &= result.success;
            for error in result.errors {
                if !combined.errors.contains(&error) {
                    combined.errors.push(error);
                }
            }
            combined.artifacts.extend(result.artifacts);
        }
        combined
    }

    /// Report the region through `on_bbox_update` before exporting all profiles.
    pub fn export_with_bbox_changes(
        &self,
        payload: &ComposePayload,
        profiles: &ProfileSet,
        destination: &mut dyn Destination,
        on_bbox_update: Option<&mut dyn FnMut(&Region)>,
    ) -> ExportResult {
        if let Some(callback) = on_bbox_update {
            callback(&payload.region);
        }
        self.export_all_profiles(payload, profiles, destination)
    }
}

fn write(
    destination: &mut dyn Destination,
    profile_key: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<String, WriteAborted> {
    destination
        .write(profile_key, file_name, bytes)
        .map_err(|err| WriteAborted(format!("{profile_key}: {}", PipelineError::Unexpected(err))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::ImageRasterOps;
    use crate::layout::PsdSerializer;
    use image::{DynamicImage, RgbImage};
    use packshot_utils::profiles::TargetSize;
    use tempfile::tempdir;

    /// In-memory destination that can refuse profiles or fail writes.
    #[derive(Default)]
    struct MemoryDestination {
        unavailable: Vec<String>,
        fail_after: Option<usize>,
        writes: Vec<(String, String, usize)>,
    }

    impl Destination for MemoryDestination {
        fn is_available(&self, profile_key: &str) -> bool {
            !self.unavailable.iter().any(|k| k == profile_key)
        }

        fn write(&mut self, profile_key: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
            if self.fail_after.is_some_and(|limit| self.writes.len() >= limit) {
                anyhow::bail!("disk full");
            }
            self.writes
                .push((profile_key.to_string(), file_name.to_string(), bytes.len()));
            Ok(format!("mem://{profile_key}/{file_name}"))
        }
    }

    fn exporter() -> Exporter {
        Exporter::new(
            Compositor::new(
                Box::new(ImageRasterOps::default()),
                Box::new(PsdSerializer),
                None,
            ),
            ExportOptions::default(),
        )
    }

    fn payload() -> ComposePayload {
        ComposePayload::new(
            "sku9",
            DynamicImage::ImageRgb8(RgbImage::from_pixel(120, 80, image::Rgb([10, 200, 30]))),
            Region::new(10, 10, 100, 60).unwrap(),
        )
    }

    fn two_sizes() -> Vec<TargetSize> {
        vec![TargetSize::new("main", 40, 30), TargetSize::new("thumb", 16, 16)]
    }

    #[test]
    fn file_counts_follow_formats() {
        let implicit = OutputProfile::new(vec![]);
        let empty = OutputProfile::new(vec![]).with_formats(vec![]);
        let three = OutputProfile::new(vec![]).with_formats(vec![
            OutputFormat::Jpg,
            OutputFormat::Png,
            OutputFormat::Psd,
        ]);
        assert_eq!(calculate_file_count(&implicit), 1);
        assert_eq!(calculate_file_count(&empty), 0);
        assert_eq!(calculate_file_count(&three), 3);

        let mut implicit_document = OutputProfile::new(vec![]);
        implicit_document.export_psd = true;
        let mut listed_document = three.clone();
        listed_document.export_psd = true;
        assert_eq!(calculate_file_count(&implicit_document), 2);
        assert_eq!(calculate_file_count(&listed_document), 3);

        let profiles: ProfileSet = [
            ("a".to_string(), implicit),
            ("b".to_string(), empty),
            ("c".to_string(), three),
        ]
        .into_iter()
        .collect();
        assert_eq!(calculate_total_file_count(&profiles), 4);
    }

    #[test]
    fn unavailable_destination_fails_fast() {
        let mut destination = MemoryDestination {
            unavailable: vec!["shop".into()],
            ..MemoryDestination::default()
        };
        let profile = OutputProfile::new(two_sizes());
        let result =
            exporter().export_single_profile(&payload(), &profile, "shop", &mut destination);

        assert!(!result.success);
        assert_eq!(result.errors, vec!["Directory handle not available".to_string()]);
        assert!(result.artifacts.is_empty());
        assert!(destination.writes.is_empty());
    }

    #[test]
    fn implicit_jpeg_writes_one_file_per_size() {
        let mut destination = MemoryDestination::default();
        let profile = OutputProfile::new(two_sizes());
        let result =
            exporter().export_single_profile(&payload(), &profile, "web", &mut destination);

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].format, OutputFormat::Jpg);
        let names: Vec<_> = destination.writes.iter().map(|w| w.1.as_str()).collect();
        assert_eq!(names, ["sku9_main_40x30.jpg", "sku9_thumb_16x16.jpg"]);
    }

    #[test]
    fn psd_format_writes_document() {
        let mut destination = MemoryDestination::default();
        let profile = OutputProfile::new(two_sizes())
            .with_formats(vec![OutputFormat::Png, OutputFormat::Psd]);
        let result =
            exporter().export_single_profile(&payload(), &profile, "print", &mut destination);

        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.artifacts.len(), 2);
        assert_eq!(
            result.artifacts[1].files,
            vec!["mem://print/sku9_print.psd".to_string()]
        );
        assert_eq!(destination.writes.len(), 3);
    }

    #[test]
    fn export_psd_flag_adds_a_document_unit() {
        let mut destination = MemoryDestination::default();
        let mut profile = OutputProfile::new(two_sizes());
        profile.export_psd = true;
        let result =
            exporter().export_single_profile(&payload(), &profile, "shop", &mut destination);

        assert!(result.success, "{:?}", result.errors);
        let formats: Vec<_> = result.artifacts.iter().map(|a| a.format).collect();
        assert_eq!(formats, [OutputFormat::Jpg, OutputFormat::Psd]);
        assert_eq!(result.artifacts.len(), calculate_file_count(&profile));
        let names: Vec<_> = destination.writes.iter().map(|w| w.1.as_str()).collect();
        assert_eq!(
            names,
            ["sku9_main_40x30.jpg", "sku9_thumb_16x16.jpg", "sku9_shop.psd"]
        );
    }

    #[test]
    fn progress_counts_every_file_once_per_profile() {
        let (tx, rx) = std::sync::mpsc::channel();
        let exporter = Exporter::new(
            Compositor::new(
                Box::new(ImageRasterOps::default()),
                Box::new(PsdSerializer),
                Some(tx),
            ),
            ExportOptions::default(),
        );
        let profile = OutputProfile::new(two_sizes()).with_formats(vec![
            OutputFormat::Jpg,
            OutputFormat::Png,
            OutputFormat::Psd,
        ]);
        let mut destination = MemoryDestination::default();
        let result = exporter.export_single_profile(&payload(), &profile, "shop", &mut destination);
        assert!(result.success, "{:?}", result.errors);

        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().all(|e| e.tag == "shop" && e.total == 5));
        let steps: Vec<_> = events
            .iter()
            .map(|e| (e.step.as_str(), e.completed))
            .collect();
        assert_eq!(
            steps,
            [
                ("main.jpg", 1),
                ("thumb.jpg", 2),
                ("main.png", 3),
                ("thumb.png", 4),
                (DOCUMENT_STEP, 5),
            ]
        );
    }

    #[test]
    fn write_error_stops_remaining_units() {
        let mut destination = MemoryDestination {
            fail_after: Some(1),
            ..MemoryDestination::default()
        };
        let profile = OutputProfile::new(two_sizes())
            .with_formats(vec![OutputFormat::Jpg, OutputFormat::Png]);
        let result =
            exporter().export_single_profile(&payload(), &profile, "web", &mut destination);

        assert!(!result.success);
        assert_eq!(result.errors, vec!["web: disk full".to_string()]);
        assert!(result.artifacts.is_empty());
        assert_eq!(destination.writes.len(), 1);
    }

    #[test]
    fn composition_failures_are_prefixed_with_profile() {
        let mut destination = MemoryDestination::default();
        let mut profile = OutputProfile::new(two_sizes()).with_formats(vec![OutputFormat::Psd]);
        profile.sizes.clear();
        let result =
            exporter().export_single_profile(&payload(), &profile, "print", &mut destination);

        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("print/document: "));
        assert_eq!(result.artifacts.len(), 1);
        assert!(result.artifacts[0].files.is_empty());
    }

    #[test]
    fn all_profiles_aggregate_distinct_errors_and_continue() {
        let mut destination = MemoryDestination {
            unavailable: vec!["first".into(), "third".into()],
            ..MemoryDestination::default()
        };
        let profiles: ProfileSet = ["first", "second", "third"]
            .into_iter()
            .map(|key| (key.to_string(), OutputProfile::new(two_sizes())))
            .collect();

        let result = exporter().export_all_profiles(&payload(), &profiles, &mut destination);
        assert!(!result.success);
        assert_eq!(result.errors, vec!["Directory handle not available".to_string()]);
        assert_eq!(result.artifacts.len(), 1);
        assert_eq!(result.artifacts[0].profile_key, "second");
        assert_eq!(destination.writes.len(), 2);
    }

    #[test]
    fn artifact_count_matches_file_count_estimate() {
        let mut destination = MemoryDestination::default();
        let mut profiles = ProfileSet::new();
        profiles.insert("a", OutputProfile::new(two_sizes()));
        profiles.insert(
            "b",
            OutputProfile::new(two_sizes()).with_formats(vec![
                OutputFormat::Jpg,
                OutputFormat::Png,
                OutputFormat::Psd,
            ]),
        );
        profiles.insert("c", OutputProfile::new(two_sizes()).with_formats(vec![]));

        let result = exporter().export_all_profiles(&payload(), &profiles, &mut destination);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.artifacts.len(), calculate_total_file_count(&profiles));
    }

    #[test]
    fn bbox_hook_runs_before_export() {
        let mut destination = MemoryDestination::default();
        let profiles: ProfileSet = [("web".to_string(), OutputProfile::new(two_sizes()))]
            .into_iter()
            .collect();
        let mut seen = Vec::new();
        let mut hook = |region: &Region| seen.push(*region);

        let result = exporter().export_with_bbox_changes(
            &payload(),
            &profiles,
            &mut destination,
            Some(&mut hook),
        );
        assert!(result.success);
        assert_eq!(seen, vec![payload().region]);
    }

    #[test]
    fn directory_destination_writes_per_profile_folders() {
        let dir = tempdir().unwrap();
        let mut destination = DirectoryDestination::create(dir.path().join("out")).unwrap();
        assert!(destination.is_available("any"));

        let profile = OutputProfile::new(two_sizes()).with_formats(vec![OutputFormat::Png]);
        let result =
            exporter().export_single_profile(&payload(), &profile, "shop", &mut destination);
        assert!(result.success, "{:?}", result.errors);
        assert!(dir.path().join("out/shop/sku9_main_40x30.png").is_file());
        assert!(dir.path().join("out/shop/sku9_thumb_16x16.png").is_file());

        let missing = DirectoryDestination::new(dir.path().join("nope"));
        assert!(!missing.is_available("shop"));
    }
}
