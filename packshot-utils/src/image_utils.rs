use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage, imageops::FilterType};
use ndarray::Array3;

use crate::config::ResizeQuality;

/// Grey level used for letterbox padding of model inputs.
pub const LETTERBOX_FILL: u8 = 114;

/// Load an image from disk into memory.
pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
    let path_ref = path.as_ref();
    image::open(path_ref).with_context(|| format!("failed to open image {}", path_ref.display()))
}

/// Decode an in-memory encoded image (JPEG, PNG, ...).
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory(bytes).context("failed to decode image bytes")
}

/// Resampling filter for model input preparation.
pub fn filter_for(quality: ResizeQuality) -> FilterType {
    match quality {
        ResizeQuality::Quality => FilterType::Triangle,
        ResizeQuality::Speed => FilterType::Nearest,
    }
}

/// Aspect-preserving fit of a source image into a fixed model input, with symmetric padding.
///
/// `to_source` undoes the transform for coordinates produced in model space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub scale: f32,
    pub resized_width: u32,
    pub resized_height: u32,
    pub pad_left: f32,
    pub pad_top: f32,
}

impl LetterboxTransform {
    /// Transform that leaves coordinates unchanged.
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            resized_width: 0,
            resized_height: 0,
            pad_left: 0.0,
            pad_top: 0.0,
        }
    }

    /// Compute the fit of `original` into `target`, both `(width, height)`.
    pub fn compute(original: (u32, u32), target: (u32, u32)) -> Result<Self> {
        let (orig_w, orig_h) = original;
        let (target_w, target_h) = target;
        anyhow::ensure!(
            target_w > 0 && target_h > 0,
            "target dimensions must be non-zero"
        );
        anyhow::ensure!(
            orig_w > 0 && orig_h > 0,
            "original dimensions must be non-zero"
        );

        let scale = (target_w as f32 / orig_w as f32).min(target_h as f32 / orig_h as f32);
        let resized_width = ((orig_w as f32 * scale).round() as u32).clamp(1, target_w);
        let resized_height = ((orig_h as f32 * scale).round() as u32).clamp(1, target_h);
        Ok(Self {
            scale,
            resized_width,
            resized_height,
            pad_left: ((target_w - resized_width) / 2) as f32,
            pad_top: ((target_h - resized_height) / 2) as f32,
        })
    }

    /// Map a model-space point back to source pixels.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_left) / self.scale, (y - self.pad_top) / self.scale)
    }

    /// Map a model-space length back to source pixels.
    pub fn length_to_source(&self, length: f32) -> f32 {
        length / self.scale
    }
}

/// Letterbox `image` into a `target` canvas filled with [`LETTERBOX_FILL`].
pub fn letterbox_image(
    image: &DynamicImage,
    target: (u32, u32),
    filter: FilterType,
) -> Result<(RgbImage, LetterboxTransform)> {
    let transform = LetterboxTransform::compute((image.width(), image.height()), target)?;
    let resized = image
        .resize_exact(transform.resized_width, transform.resized_height, filter)
        .to_rgb8();

    let mut canvas = RgbImage::from_pixel(target.0, target.1, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        transform.pad_left as i64,
        transform.pad_top as i64,
    );
    Ok((canvas, transform))
}

/// RGB image to a CHW array with channel values scaled into `[0, 1]`.
pub fn rgb_to_chw(image: &RgbImage) -> Array3<f32> {
    let (width, height) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        let (xi, yi) = (x as usize, y as usize);
        for channel in 0..3 {
            array[(channel, yi, xi)] = pixel[channel] as f32 / 255.0;
        }
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_to_chw_scales_and_reorders() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([0, 51, 255]));
        image.put_pixel(1, 0, Rgb([255, 0, 0]));

        let array = rgb_to_chw(&image);
        assert_eq!(array.shape(), &[3, 1, 2]);
        assert_eq!(array[(0, 0, 0)], 0.0);
        assert!((array[(1, 0, 0)] - 0.2).abs() < 1e-6);
        assert_eq!(array[(2, 0, 0)], 1.0);
        assert_eq!(array[(0, 0, 1)], 1.0);
    }

    #[test]
    fn letterbox_pads_the_short_side() {
        let transform = LetterboxTransform::compute((1280, 640), (640, 640)).unwrap();
        assert_eq!(transform.scale, 0.5);
        assert_eq!((transform.resized_width, transform.resized_height), (640, 320));
        assert_eq!(transform.pad_left, 0.0);
        assert_eq!(transform.pad_top, 160.0);

        let (x, y) = transform.to_source(320.0, 160.0);
        assert_eq!((x, y), (640.0, 0.0));
        assert_eq!(transform.length_to_source(10.0), 20.0);
    }

    #[test]
    fn letterbox_rejects_empty_images() {
        assert!(LetterboxTransform::compute((0, 10), (640, 640)).is_err());
        assert!(LetterboxTransform::compute((10, 10), (0, 640)).is_err());
    }

    #[test]
    fn letterbox_image_fills_padding() {
        let source = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 20, Rgb([10, 20, 30])));
        let (canvas, transform) = letterbox_image(&source, (20, 20), FilterType::Nearest).unwrap();
        assert_eq!(canvas.dimensions(), (20, 20));
        assert_eq!(transform.pad_top, 5.0);
        assert_eq!(canvas.get_pixel(0, 0), &Rgb([LETTERBOX_FILL; 3]));
        assert_eq!(canvas.get_pixel(10, 10), &Rgb([10, 20, 30]));
    }

    #[test]
    fn identity_leaves_points_alone() {
        let identity = LetterboxTransform::identity();
        assert_eq!(identity.to_source(12.5, 7.0), (12.5, 7.0));
    }
}
