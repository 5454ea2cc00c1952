//! Raster encoding and artifact file naming.
//!
//! Encoders produce bytes in memory so the same output can be written to any destination.

use anyhow::{Context, Result};
use image::{
    DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage,
    codecs::{
        jpeg::JpegEncoder,
        png::{CompressionType, FilterType, PngEncoder},
    },
};
use log::warn;
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
};

use crate::{config::OutputSettings, psd::blend_over};

/// Single-raster encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterFormat {
    Jpeg,
    Png,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Jpeg => "jpg",
            RasterFormat::Png => "png",
        }
    }
}

/// PNG compression strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PngCompression {
    Fast,
    Default,
    Best,
}

impl PngCompression {
    /// Accepts `fast`/`default`/`best` or a zlib-style level `0..=9`.
    pub fn parse(input: &str) -> Self {
        let normalized = input.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "fast" => Self::Fast,
            "best" => Self::Best,
            "default" => Self::Default,
            level => match level.parse::<u8>() {
                Ok(0..=3) => Self::Fast,
                Ok(7..=9) => Self::Best,
                Ok(_) => Self::Default,
                Err(_) => {
                    warn!("Unknown PNG compression '{input}', using the default strategy");
                    Self::Default
                }
            },
        }
    }

    fn to_image(self) -> CompressionType {
        match self {
            Self::Fast => CompressionType::Fast,
            Self::Default => CompressionType::Default,
            Self::Best => CompressionType::Best,
        }
    }
}

/// Encoder parameters resolved from [`OutputSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub jpeg_quality: u8,
    pub png_compression: PngCompression,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::from_settings(&OutputSettings::default())
    }
}

impl EncodeOptions {
    pub fn from_settings(settings: &OutputSettings) -> Self {
        Self {
            jpeg_quality: settings.jpeg_quality.clamp(1, 100),
            png_compression: PngCompression::parse(&settings.png_compression),
        }
    }
}

/// Encode an image into `format`. JPEG output is flattened onto white.
pub fn encode_raster(
    image: &DynamicImage,
    format: RasterFormat,
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    match format {
        RasterFormat::Png => encode_png(image, options.png_compression),
        RasterFormat::Jpeg => encode_jpeg(image, options.jpeg_quality),
    }
}

fn encode_png(image: &DynamicImage, compression: PngCompression) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut buffer = Vec::new();
    PngEncoder::new_with_quality(&mut buffer, compression.to_image(), FilterType::Adaptive)
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .context("failed to encode PNG")?;
    Ok(buffer)
}

fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let rgb = if image.color().has_alpha() {
        flatten_onto(&image.to_rgba8(), Rgba([255, 255, 255, 255])).to_rgb8()
    } else {
        image.to_rgb8()
    };
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .write_image(
            rgb.as_raw(),
            rgb.width(),
            rgb.height(),
            ExtendedColorType::Rgb8,
        )
        .context("failed to encode JPEG")?;
    Ok(buffer)
}

/// Alpha-composite `image` over an opaque background.
pub fn flatten_onto(image: &RgbaImage, background: Rgba<u8>) -> DynamicImage {
    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), background);
    for (dst, src) in canvas.pixels_mut().zip(image.pixels()) {
        blend_over(dst, src);
    }
    DynamicImage::ImageRgba8(canvas)
}

/// File name of one rendered size: `<item><sep><size>_<w>x<h>.<ext>`.
pub fn sized_file_name(
    item_id: &str,
    separator: &str,
    size_name: &str,
    width: u32,
    height: u32,
    extension: &str,
) -> String {
    format!("{item_id}{separator}{size_name}_{width}x{height}.{extension}")
}

/// File name of a profile's layered document: `<item><sep><profile>.<ext>`.
pub fn document_file_name(
    item_id: &str,
    separator: &str,
    profile_key: &str,
    extension: &str,
) -> String {
    format!("{item_id}{separator}{profile_key}.{extension}")
}

/// Write bytes to `path`, creating parent directories as needed.
pub fn write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;
    Ok(())
}
