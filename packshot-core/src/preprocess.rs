//! Model input preparation.
//!
//! Images are letterboxed into the detector's square input, converted to RGB CHW with values in
//! `[0, 1]`, and wrapped in a `[1, 3, H, W]` tensor. The letterbox transform travels with the
//! tensor so detections can be mapped back to the source image.

use std::path::Path;

use anyhow::{Context, Result};
use image::DynamicImage;
use packshot_utils::{
    config::{InputDimensions, ResizeQuality},
    filter_for,
    image_utils::LetterboxTransform,
    letterbox_image, load_image, rgb_to_chw,
    telemetry::timing_guard,
};
use tract_onnx::prelude::Tensor;

/// Model input resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for InputSize {
    fn default() -> Self {
        Self::new(640, 640)
    }
}

impl From<InputDimensions> for InputSize {
    fn from(dimensions: InputDimensions) -> Self {
        Self::new(dimensions.width, dimensions.height)
    }
}

/// Input size plus resampling preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessConfig {
    pub input_size: InputSize,
    pub resize_quality: ResizeQuality,
}

impl From<InputDimensions> for PreprocessConfig {
    fn from(dimensions: InputDimensions) -> Self {
        Self {
            input_size: dimensions.into(),
            resize_quality: dimensions.resize_quality,
        }
    }
}

impl From<&InputDimensions> for PreprocessConfig {
    fn from(dimensions: &InputDimensions) -> Self {
        (*dimensions).into()
    }
}

/// Tensor ready for inference and the mapping back to source pixels.
#[derive(Debug)]
pub struct PreprocessOutput {
    pub tensor: Tensor,
    pub transform: LetterboxTransform,
    pub original_size: (u32, u32),
}

/// Preprocess an image file.
pub fn preprocess_image<P: AsRef<Path>>(
    path: P,
    config: &PreprocessConfig,
) -> Result<PreprocessOutput> {
    let path_ref = path.as_ref();
    let image = load_image(path_ref)
        .with_context(|| format!("failed to load image from {}", path_ref.display()))?;
    preprocess_dynamic_image(&image, config)
}

/// Preprocess an in-memory image.
pub fn preprocess_dynamic_image(
    image: &DynamicImage,
    config: &PreprocessConfig,
) -> Result<PreprocessOutput> {
    let _guard = timing_guard("packshot_core::preprocess", log::Level::Trace);
    let InputSize { width, height } = config.input_size;

    let (canvas, transform) =
        letterbox_image(image, (width, height), filter_for(config.resize_quality))?;
    let chw = rgb_to_chw(&canvas);

    let shape = [1usize, 3, height as usize, width as usize];
    let (data, offset) = chw.into_raw_vec_and_offset();
    debug_assert_eq!(offset, Some(0), "expected contiguous array");
    let tensor = Tensor::from_shape(&shape, &data)
        .map_err(|e| anyhow::anyhow!("failed to build input tensor: {e}"))?;

    Ok(PreprocessOutput {
        tensor,
        transform,
        original_size: (image.width(), image.height()),
    })
}
