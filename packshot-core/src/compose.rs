//! Renders one edited region into every target size of a profile.
//!
//! The region is cropped once; each size then gets either a cover fit (crop the visible window,
//! resize exactly) or, for profiles with a pad color, a contain fit centred on a padded canvas.
//! A failing size is recorded and the remaining sizes still render.

use std::{borrow::Cow, fmt, sync::mpsc::Sender};

use anyhow::{Context, Result};
use image::{DynamicImage, RgbaImage, imageops::FilterType};
use log::{debug, warn};
use packshot_utils::{
    color::{RgbaColor, parse_color_spec},
    config::LayoutPattern,
    profiles::{OutputProfile, TargetSize},
    psd::MaskRect,
    timing_guard,
};

use crate::error::{PipelineError, PipelineResult};
use crate::layout::{DocumentSerializer, LayoutJob, LayoutLayer, build_layout, grid_cells};
use crate::placement::{PlacementResult, place_contain, place_cover};
use crate::region::Region;

/// Crop and resize primitives.
pub trait RasterOps: Send {
    fn crop(
        &self,
        image: &DynamicImage,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage>;

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage>;
}

/// [`RasterOps`] backed by the `image` crate.
#[derive(Debug, Clone, Copy)]
pub struct ImageRasterOps {
    filter: FilterType,
}

impl ImageRasterOps {
    pub fn new(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ImageRasterOps {
    fn default() -> Self {
        Self::new(FilterType::Lanczos3)
    }
}

impl RasterOps for ImageRasterOps {
    fn crop(
        &self,
        image: &DynamicImage,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<DynamicImage> {
        anyhow::ensure!(
            width > 0
                && height > 0
                && x.saturating_add(width) <= image.width()
                && y.saturating_add(height) <= image.height(),
            "crop {}x{}+{}+{} exceeds {}x{} image",
            width,
            height,
            x,
            y,
            image.width(),
            image.height()
        );
        Ok(image.crop_imm(x, y, width, height))
    }

    fn resize(&self, image: &DynamicImage, width: u32, height: u32) -> Result<DynamicImage> {
        anyhow::ensure!(width > 0 && height > 0, "cannot resize to {width}x{height}");
        if image.width() == width && image.height() == height {
            return Ok(image.clone());
        }
        Ok(image.resize_exact(width, height, self.filter))
    }
}

/// Progress notification; `completed` counts up to `total` within one tagged unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub tag: String,
    pub step: String,
    pub completed: usize,
    pub total: usize,
}

/// Sends [`ProgressEvent`]s for one tagged task. Send failures are ignored.
#[derive(Debug)]
pub struct ProgressReporter<'a> {
    sender: Option<&'a Sender<ProgressEvent>>,
    tag: &'a str,
    completed: usize,
    total: usize,
}

impl<'a> ProgressReporter<'a> {
    pub fn new(sender: Option<&'a Sender<ProgressEvent>>, tag: &'a str, total: usize) -> Self {
        Self {
            sender,
            tag,
            completed: 0,
            total,
        }
    }

    pub fn advance(&mut self, step: impl Into<String>) {
        self.completed += 1;
        if let Some(sender) = self.sender {
            let _ = sender.send(ProgressEvent {
                tag: self.tag.to_string(),
                step: step.into(),
                completed: self.completed,
                total: self.total,
            });
        }
    }
}

/// Source image plus the region to render and the identifier used in file names.
#[derive(Debug, Clone)]
pub struct ComposePayload {
    pub item_id: String,
    pub image: DynamicImage,
    pub region: Region,
    /// When set, every size crops its own window: the region grown toward that size's aspect
    /// ratio and then by the profile's `pad` (this value when the profile has none). When unset
    /// the region is rendered exactly as given.
    pub expand_pad: Option<u32>,
}

impl ComposePayload {
    pub fn new(item_id: impl Into<String>, image: DynamicImage, region: Region) -> Self {
        Self {
            item_id: item_id.into(),
            image,
            region,
            expand_pad: None,
        }
    }

    pub fn with_expand_pad(mut self, default_pad: u32) -> Self {
        self.expand_pad = Some(default_pad);
        self
    }
}

/// One rendered target size.
#[derive(Debug, Clone)]
pub struct ComposedImage {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub image: DynamicImage,
}

/// A size (or the layered document) that could not be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeFailure {
    pub size: String,
    pub reason: String,
}

impl fmt::Display for SizeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.size, self.reason)
    }
}

impl From<SizeFailure> for PipelineError {
    fn from(failure: SizeFailure) -> Self {
        PipelineError::CompositionFailure {
            size: failure.size,
            reason: failure.reason,
        }
    }
}

/// Everything produced for one (region, profile) pair.
#[derive(Debug, Default)]
pub struct Composition {
    pub images: Vec<ComposedImage>,
    pub failures: Vec<SizeFailure>,
    /// Serialized layered document, when requested.
    pub document: Option<Vec<u8>>,
}

/// An image placed into a multi-image layout.
#[derive(Debug, Clone)]
pub struct LayoutItem {
    /// Layer name; normally the source file stem.
    pub name: String,
    pub image: DynamicImage,
}

/// Result of [`Compositor::compose_layout`].
#[derive(Debug, Clone)]
pub struct LayoutOutput {
    pub job: LayoutJob,
    pub background: RgbaColor,
    pub flattened: RgbaImage,
}

/// Name given to the layered document in failures and progress.
pub const DOCUMENT_STEP: &str = "document";

/// Sequences crop, placement and resize for each target size.
pub struct Compositor {
    raster: Box<dyn RasterOps>,
    serializer: Box<dyn DocumentSerializer>,
    progress: Option<Sender<ProgressEvent>>,
}

impl Compositor {
    pub fn new(
        raster: Box<dyn RasterOps>,
        serializer: Box<dyn DocumentSerializer>,
        progress: Option<Sender<ProgressEvent>>,
    ) -> Self {
        Self {
            raster,
            serializer,
            progress,
        }
    }

    pub fn serializer(&self) -> &dyn DocumentSerializer {
        self.serializer.as_ref()
    }

    pub(crate) fn progress(&self) -> Option<&Sender<ProgressEvent>> {
        self.progress.as_ref()
    }

    /// Render every size of `profile`; builds the layered document when `export_psd` is set.
    pub fn compose(
        &self,
        payload: &ComposePayload,
        profile: &OutputProfile,
        tag: &str,
    ) -> PipelineResult<Composition> {
        let mut progress = ProgressReporter::new(
            self.progress.as_ref(),
            tag,
            profile.sizes.len() + usize::from(profile.export_psd),
        );
        self.render(payload, profile, tag, profile.export_psd, &mut progress)
    }

    pub(crate) fn render(
        &self,
        payload: &ComposePayload,
        profile: &OutputProfile,
        tag: &str,
        with_document: bool,
        progress: &mut ProgressReporter<'_>,
    ) -> PipelineResult<Composition> {
        let _guard = timing_guard(format!("packshot_core::compose[{tag}]"), log::Level::Debug);
        let (image_w, image_h) = (payload.image.width(), payload.image.height());
        let region = payload.region.clamped(image_w, image_h)?;
        let cropped =
            self.raster
                .crop(&payload.image, region.x, region.y, region.width, region.height)?;

        let pad = profile.pad_color.map(|c| c.to_rgba_color());
        let mut composition = Composition::default();

        for size in &profile.sizes {
            let rendered = self
                .size_source(payload, &cropped, &region, size, profile)
                .and_then(|source| self.render_size(&source, size, pad));
            match rendered {
                Ok(image) => composition.images.push(ComposedImage {
                    name: size.name.clone(),
                    width: size.width,
                    height: size.height,
                    image,
                }),
                Err(err) => {
                    warn!("{tag}/{}: {err:#}", size.name);
                    composition.failures.push(SizeFailure {
                        size: size.name.clone(),
                        reason: format!("{err:#}"),
                    });
                }
            }
            progress.advance(size.name.clone());
        }

        if with_document {
            let document = profile
                .sizes
                .first()
                .context("profile has no sizes to build a document from")
                .and_then(|size| {
                    let source = self.size_source(payload, &cropped, &region, size, profile)?;
                    self.render_document(&source, &payload.item_id, size, pad)
                });
            match document {
                Ok(bytes) => composition.document = Some(bytes),
                Err(err) => composition.failures.push(SizeFailure {
                    size: DOCUMENT_STEP.to_string(),
                    reason: format!("{err:#}"),
                }),
            }
            progress.advance(DOCUMENT_STEP);
        }

        debug!(
            "Composed {} size(s) for {tag} ({} failure(s))",
            composition.images.len(),
            composition.failures.len()
        );
        Ok(composition)
    }

    /// Pixels a size renders from: the shared crop, or a window expanded toward its aspect.
    fn size_source<'c>(
        &self,
        payload: &ComposePayload,
        cropped: &'c DynamicImage,
        region: &Region,
        size: &TargetSize,
        profile: &OutputProfile,
    ) -> Result<Cow<'c, DynamicImage>> {
        let Some(default_pad) = payload.expand_pad else {
            return Ok(Cow::Borrowed(cropped));
        };
        let (image_w, image_h) = (payload.image.width(), payload.image.height());
        let ratio = size.width as f64 / size.height as f64;
        let pad = profile.pad_or(default_pad);
        let window = region.expand_to_aspect(ratio, pad, image_w, image_h)?;
        let pixels =
            self.raster
                .crop(&payload.image, window.x, window.y, window.width, window.height)?;
        Ok(Cow::Owned(pixels))
    }

    fn render_size(
        &self,
        cropped: &DynamicImage,
        size: &TargetSize,
        pad: Option<RgbaColor>,
    ) -> Result<DynamicImage> {
        let (src_w, src_h) = (cropped.width(), cropped.height());
        let (dst_w, dst_h) = (size.width as f64, size.height as f64);

        match pad {
            None => {
                let placement = place_cover(src_w as f64, src_h as f64, 0.0, 0.0, dst_w, dst_h)?;
                let window = placement.source_window(src_w, src_h);
                let visible = self
                    .raster
                    .crop(cropped, window.x, window.y, window.width, window.height)?;
                self.raster.resize(&visible, size.width, size.height)
            }
            Some(color) => {
                let placement = place_contain(src_w as f64, src_h as f64, 0.0, 0.0, dst_w, dst_h)?;
                let (fit_w, fit_h) = scaled_pixels(&placement, size.width, size.height);
                let fitted = self.raster.resize(cropped, fit_w, fit_h)?;

                let mut canvas = RgbaImage::from_pixel(size.width, size.height, color.to_rgba());
                image::imageops::overlay(
                    &mut canvas,
                    &fitted.to_rgba8(),
                    ((size.width - fit_w) / 2) as i64,
                    ((size.height - fit_h) / 2) as i64,
                );
                Ok(DynamicImage::ImageRgba8(canvas))
            }
        }
    }

    /// Single-layer document at `size` (the first target), masked to the canvas.
    fn render_document(
        &self,
        cropped: &DynamicImage,
        item_id: &str,
        size: &TargetSize,
        pad: Option<RgbaColor>,
    ) -> Result<Vec<u8>> {
        let (src_w, src_h) = (cropped.width() as f64, cropped.height() as f64);
        let (dst_w, dst_h) = (size.width as f64, size.height as f64);
        let placement = match pad {
            Some(_) => place_contain(src_w, src_h, 0.0, 0.0, dst_w, dst_h)?,
            None => place_cover(src_w, src_h, 0.0, 0.0, dst_w, dst_h)?,
        };

        let (layer_w, layer_h) = scaled_pixels(&placement, u32::MAX, u32::MAX);
        let raster = self.raster.resize(cropped, layer_w, layer_h)?.to_rgba8();
        let job = vec![LayoutLayer {
            layer_name: item_id.to_string(),
            raster,
            left: placement.draw_left.round() as i32,
            top: placement.draw_top.round() as i32,
            mask: MaskRect::new(0, 0, size.width, size.height),
        }];

        let document = build_layout(
            job,
            size.width,
            size.height,
            pad.unwrap_or(RgbaColor::WHITE),
        );
        self.serializer.serialize(&document)
    }

    /// Place several images into grid cells of one canvas.
    pub fn compose_layout(
        &self,
        items: &[LayoutItem],
        canvas: (u32, u32),
        pattern: &LayoutPattern,
        tag: &str,
    ) -> PipelineResult<LayoutOutput> {
        let _guard = timing_guard(
            format!("packshot_core::compose_layout[{tag}]"),
            log::Level::Debug,
        );
        let (canvas_w, canvas_h) = canvas;
        let cells = grid_cells(items.len(), canvas_w, canvas_h, pattern)?;
        let background = parse_color_spec(&pattern.background).unwrap_or_else(|| {
            warn!(
                "Invalid layout background '{}', using black",
                pattern.background
            );
            RgbaColor::BLACK
        });

        let mut progress = ProgressReporter::new(self.progress.as_ref(), tag, items.len());
        let mut job = LayoutJob::with_capacity(items.len());
        for (item, cell) in items.iter().zip(cells) {
            let placement = place_cover(
                item.image.width() as f64,
                item.image.height() as f64,
                cell.left as f64,
                cell.top as f64,
                cell.width as f64,
                cell.height as f64,
            )?;
            let (layer_w, layer_h) = scaled_pixels(&placement, u32::MAX, u32::MAX);
            let raster = self.raster.resize(&item.image, layer_w, layer_h)?.to_rgba8();
            job.push(LayoutLayer {
                layer_name: item.name.clone(),
                raster,
                left: placement.draw_left.round() as i32,
                top: placement.draw_top.round() as i32,
                mask: cell,
            });
            progress.advance(item.name.clone());
        }

        let flattened = build_layout(job.clone(), canvas_w, canvas_h, background).flatten();
        Ok(LayoutOutput {
            job,
            background,
            flattened,
        })
    }
}

/// Scaled placement size in whole pixels, at least 1 and at most the given bounds.
fn scaled_pixels(placement: &PlacementResult, max_w: u32, max_h: u32) -> (u32, u32) {
    let w = (placement.scaled_width.round() as u32).clamp(1, max_w.max(1));
    let h = (placement.scaled_height.round() as u32).clamp(1, max_h.max(1));
    (w, h)
}
