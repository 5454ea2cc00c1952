mod annotate;
mod args;
mod config;
mod input;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};
use packshot_core::{
    ComposePayload, ComposedImage, Destination, DirectoryDestination, EngineFactory,
    InferenceEngine, InputSize, LayoutItem, OnnxModel, Region, Request, Response, WorkerHandle,
    WorkerSettings, export_formats, largest_prediction, spawn_worker,
};
use packshot_utils::{
    config::AppSettings,
    configure_from_settings, init_logging, load_image,
    output::{EncodeOptions, RasterFormat, document_file_name, encode_raster, sized_file_name},
    profiles::{OutputFormat, OutputProfile, ProfileSet},
};

use crate::{
    annotate::write_debug_image,
    args::BatchArgs,
    config::{apply_cli_overrides, load_profiles, load_settings, model_path},
    input::{collect_folder_images, item_id, scan_input_root},
};

fn main() -> Result<()> {
    init_logging(log::LevelFilter::Info)?;
    let args = BatchArgs::parse();

    let mut settings = load_settings(args.settings.as_ref())?;
    apply_cli_overrides(&mut settings, &args);
    configure_from_settings(&settings.telemetry);

    let profiles = load_profiles(&args.cfg)?;
    let plan = scan_input_root(&args.input_dir)?;
    if plan.is_empty() {
        anyhow::bail!(
            "nothing to process in {} (supported extensions: jpg, jpeg, png, bmp, webp)",
            args.input_dir.display()
        );
    }
    std::fs::create_dir_all(&args.out_dir).with_context(|| {
        format!(
            "failed to create output directory {}",
            args.out_dir.display()
        )
    })?;

    let model = model_path(&settings);
    let input_size = InputSize::new(settings.input.width, settings.input.height);
    let model_available = model.is_file();
    let factory: EngineFactory = if model_available {
        info!(
            "Loading detection model from {} at resolution {}x{}",
            model.display(),
            input_size.width,
            input_size.height
        );
        OnnxModel::factory(&model, input_size)
    } else {
        warn!(
            "Model {} not found; using centre-square regions",
            model.display()
        );
        Box::new(|| -> Result<Box<dyn InferenceEngine>> {
            anyhow::bail!("no detection model configured")
        })
    };

    let worker = spawn_worker(
        factory,
        WorkerSettings::from_app_settings(&settings, profiles.clone()),
    )?;
    let mut batch = Batch {
        worker: &worker,
        settings: &settings,
        profiles: &profiles,
        args: &args,
        detection: false,
        failures: 0,
    };
    if model_available {
        batch.init_detection()?;
    }

    info!(
        "Processing {} image(s) and {} folder(s)...",
        plan.singles.len(),
        plan.folders.len()
    );
    for path in &plan.singles {
        if let Err(err) = batch.process_single(path) {
            warn!("Failed to process {}: {err:#}", path.display());
            batch.failures += 1;
        }
    }
    for folder in &plan.folders {
        if let Err(err) = batch.process_folder(folder) {
            warn!("Failed to compose {}: {err:#}", folder.display());
            batch.failures += 1;
        }
    }

    let failures = batch.failures;
    worker.shutdown()?;
    if failures > 0 {
        anyhow::bail!("{failures} item(s) failed; see log for details");
    }
    info!("Done. Output written to {}", args.out_dir.display());
    Ok(())
}

/// Per-run state shared by the single-image and folder passes.
struct Batch<'a> {
    worker: &'a WorkerHandle,
    settings: &'a AppSettings,
    profiles: &'a ProfileSet,
    args: &'a BatchArgs,
    detection: bool,
    failures: usize,
}

impl Batch<'_> {
    fn init_detection(&mut self) -> Result<()> {
        match self.worker.call(Request::Init)? {
            Response::Ready => self.detection = true,
            Response::Error { error, .. } => {
                warn!("Detection disabled: {error:#}; using centre-square regions")
            }
            other => anyhow::bail!("unexpected response to init: {other:?}"),
        }
        Ok(())
    }

    fn drain_progress(&self) {
        for event in self.worker.progress().try_iter() {
            debug!(
                "[{}] {} ({}/{})",
                event.tag, event.step, event.completed, event.total
            );
        }
    }

    /// Region around the product: the largest detection, or the centre square.
    ///
    /// Padding and aspect expansion happen per target size during composition.
    fn choose_region(&self, id: &str, image: &image::DynamicImage) -> Result<Region> {
        let (width, height) = (image.width(), image.height());
        let pad = self.settings.output.default_pad;
        if self.detection {
            let response = self.worker.call(Request::Detect {
                file_id: id.to_string(),
                image: image.clone(),
            })?;
            match response {
                Response::Detect { predictions, .. } => {
                    if let Some(best) = largest_prediction(&predictions) {
                        debug!(
                            "{id}: best of {} prediction(s) scores {:.2}",
                            predictions.len(),
                            best.score
                        );
                        match Region::from_bbox(&best.bbox, width, height) {
                            Ok(region) => return Ok(region),
                            Err(err) => warn!("{id}: unusable detection ({err})"),
                        }
                    } else {
                        info!("{id}: nothing detected; using centre square");
                    }
                }
                Response::Error { error, .. } => warn!("{id}: detection failed ({error})"),
                other => anyhow::bail!("unexpected response to detect: {other:?}"),
            }
        }
        Ok(Region::center_square(width, height, pad)?)
    }

    fn process_single(&mut self, path: &Path) -> Result<()> {
        let id = item_id(path);
        let image = load_image(path)?;
        let region = self.choose_region(&id, &image)?;
        debug!("{id}: region {region:?}");

        if self.args.debug {
            match write_debug_image(&image, &region, &id, &self.args.out_dir) {
                Ok(path) => info!("Debug image saved to {}", path.display()),
                Err(err) => warn!("{id}: failed to write debug image: {err:#}"),
            }
        }

        let destination = DirectoryDestination::create(&self.args.out_dir)?;
        let payload = ComposePayload::new(id.clone(), image, region)
            .with_expand_pad(self.settings.output.default_pad);
        let response = self.worker.call(Request::Export {
            payload,
            profiles: self.profiles.clone(),
            destination: Box::new(destination),
        })?;
        self.drain_progress();

        match response {
            Response::Export(result) => {
                let files: usize = result.artifacts.iter().map(|a| a.files.len()).sum();
                info!("{} -> {files} file(s)", path.display());
                for error in &result.errors {
                    warn!("{id}: {error}");
                }
                if !result.success {
                    anyhow::bail!("{} export error(s)", result.errors.len());
                }
                Ok(())
            }
            Response::Error { error, .. } => Err(error.into()),
            other => anyhow::bail!("unexpected response to export: {other:?}"),
        }
    }

    /// One layout per profile, on a canvas the size of the profile's first target.
    fn process_folder(&mut self, folder: &Path) -> Result<()> {
        let images = collect_folder_images(folder);
        if images.is_empty() {
            debug!("Skipping empty folder {}", folder.display());
            return Ok(());
        }
        let folder_id = item_id(folder);
        let mut items = Vec::with_capacity(images.len());
        for path in &images {
            items.push(LayoutItem {
                name: item_id(path),
                image: load_image(path)?,
            });
        }

        let mut destination = DirectoryDestination::create(&self.args.out_dir)?;
        let mut errors = 0usize;
        for (key, profile) in self.profiles.iter() {
            let Some(size) = profile.sizes.first() else {
                warn!("Profile {key} has no sizes; skipping layout for {folder_id}");
                continue;
            };
            let canvas = (size.width, size.height);
            let pattern = self
                .settings
                .layout
                .pattern_for(size.width, size.height)
                .clone();
            let response = self.worker.call(Request::ComposeMany {
                profile_key: key.to_string(),
                items: items.clone(),
                canvas,
                pattern,
            })?;
            self.drain_progress();

            let (outputs, document) = match response {
                Response::ComposeMany {
                    outputs, document, ..
                } => (outputs, document),
                Response::Error { error, .. } => {
                    warn!("{folder_id}/{key}: {error}");
                    errors += 1;
                    continue;
                }
                other => anyhow::bail!("unexpected response to compose: {other:?}"),
            };

            let layout = FolderLayout {
                folder_id: &folder_id,
                profile_key: key,
                outputs: &outputs,
                document: document.as_deref(),
            };
            match self.write_layout(&mut destination, profile, &layout) {
                Ok(files) => info!(
                    "{} -> {folder_id}_{key} ({} image(s), {files} file(s))",
                    folder.display(),
                    items.len()
                ),
                Err(err) => {
                    warn!("{folder_id}/{key}: {err:#}");
                    errors += 1;
                }
            }
        }

        if errors > 0 {
            anyhow::bail!("{errors} layout(s) failed");
        }
        Ok(())
    }

    /// Write one profile's layout files; the first failure abandons the profile.
    fn write_layout(
        &self,
        destination: &mut DirectoryDestination,
        profile: &OutputProfile,
        layout: &FolderLayout<'_>,
    ) -> Result<usize> {
        let separator = &self.settings.output.separator;
        let encode = EncodeOptions::from_settings(&self.settings.output);
        let key = layout.profile_key;
        let mut files = 0usize;
        for format in export_formats(profile) {
            let raster = match format {
                OutputFormat::Jpg => RasterFormat::Jpeg,
                OutputFormat::Png => RasterFormat::Png,
                OutputFormat::Psd => {
                    if let Some(bytes) = layout.document {
                        let extension = format.extension();
                        let name = document_file_name(layout.folder_id, separator, key, extension);
                        destination.write(key, &name, bytes)?;
                        files += 1;
                    }
                    continue;
                }
            };
            for composed in layout.outputs {
                let bytes = encode_raster(&composed.image, raster, &encode)?;
                let name = sized_file_name(
                    layout.folder_id,
                    separator,
                    key,
                    composed.width,
                    composed.height,
                    raster.extension(),
                );
                destination.write(key, &name, &bytes)?;
                files += 1;
            }
        }
        Ok(files)
    }
}

/// Composed layout for one (folder, profile) pair.
struct FolderLayout<'a> {
    folder_id: &'a str,
    profile_key: &'a str,
    outputs: &'a [ComposedImage],
    document: Option<&'a [u8]>,
}
