//! Debug output: the chosen crop region drawn over the source image.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{DynamicImage, Rgba};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use packshot_core::Region;
use packshot_utils::output::{EncodeOptions, RasterFormat, encode_raster, write_bytes};

const OUTLINE_WIDTH: u32 = 3;

/// Outline `region` in red and save it as `debug_<item_id>.jpg` under `output_dir`.
pub fn write_debug_image(
    image: &DynamicImage,
    region: &Region,
    item_id: &str,
    output_dir: &Path,
) -> Result<PathBuf> {
    let mut canvas = image.to_rgba8();
    let color = Rgba([255, 0, 0, 255]);
    for inset in 0..OUTLINE_WIDTH {
        if let Some(rect) = inset_rect(region, inset) {
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
    }

    let bytes = encode_raster(
        &DynamicImage::ImageRgba8(canvas),
        RasterFormat::Jpeg,
        &EncodeOptions::default(),
    )?;
    let path = output_dir.join(format!("debug_{item_id}.jpg"));
    write_bytes(&path, &bytes)
        .with_context(|| format!("failed to save debug image {}", path.display()))?;
    Ok(path)
}

fn inset_rect(region: &Region, inset: u32) -> Option<Rect> {
    let width = region.width.checked_sub(inset * 2).filter(|&w| w > 0)?;
    let height = region.height.checked_sub(inset * 2).filter(|&h| h > 0)?;
    Some(
        Rect::at((region.x + inset) as i32, (region.y + inset) as i32).of_size(width, height),
    )
}
