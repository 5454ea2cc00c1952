//! Fit geometry for placing a source rectangle into a fixed-size mask.
//!
//! Cover placement scales the source just enough to fill the mask (overflow is cropped); contain
//! placement scales it to fit entirely inside (the remainder is padding). Both are pure functions.

use crate::error::{PipelineError, PipelineResult};

/// Where a scaled source lands relative to its mask, and which part of it the mask shows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementResult {
    pub scaled_width: f64,
    pub scaled_height: f64,
    pub draw_left: f64,
    pub draw_top: f64,
    /// Offset of the mask window inside the scaled source. Non-negative for cover placement.
    pub mask_offset_x: f64,
    pub mask_offset_y: f64,
    pub mask_width: f64,
    pub mask_height: f64,
}

/// Integer pixel rectangle within the unscaled source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PlacementResult {
    /// Part of the unscaled source visible through the mask, snapped to whole pixels.
    ///
    /// For contain placement the whole source is visible.
    pub fn source_window(&self, source_width: u32, source_height: u32) -> SourceWindow {
        let scale = self.scaled_width / source_width.max(1) as f64;
        let (x, width) = window_axis(self.mask_offset_x, self.mask_width, scale, source_width);
        let (y, height) = window_axis(self.mask_offset_y, self.mask_height, scale, source_height);
        SourceWindow {
            x,
            y,
            width,
            height,
        }
    }
}

fn window_axis(offset: f64, extent: f64, scale: f64, limit: u32) -> (u32, u32) {
    let limit = limit.max(1);
    let start = (offset.max(0.0) / scale).round().clamp(0.0, (limit - 1) as f64) as u32;
    let length = (extent / scale).round().max(1.0) as u32;
    (start, length.min(limit - start))
}

fn validate(
    source_width: f64,
    source_height: f64,
    mask_width: f64,
    mask_height: f64,
) -> PipelineResult<()> {
    let positive = |v: f64| v.is_finite() && v > 0.0;
    if !positive(source_width) || !positive(source_height) {
        return Err(PipelineError::InvalidGeometry {
            width: source_width,
            height: source_height,
        });
    }
    if !positive(mask_width) || !positive(mask_height) {
        return Err(PipelineError::InvalidGeometry {
            width: mask_width,
            height: mask_height,
        });
    }
    Ok(())
}

fn place_with_scale(
    scale: f64,
    source: (f64, f64),
    anchor: (f64, f64),
    mask: (f64, f64),
) -> PlacementResult {
    let scaled_width = source.0 * scale;
    let scaled_height = source.1 * scale;
    PlacementResult {
        scaled_width,
        scaled_height,
        draw_left: anchor.0 + (mask.0 - scaled_width) / 2.0,
        draw_top: anchor.1 + (mask.1 - scaled_height) / 2.0,
        mask_offset_x: (scaled_width - mask.0) / 2.0,
        mask_offset_y: (scaled_height - mask.1) / 2.0,
        mask_width: mask.0,
        mask_height: mask.1,
    }
}

/// Scale the source to cover the mask, centred on it.
pub fn place_cover(
    source_width: f64,
    source_height: f64,
    anchor_x: f64,
    anchor_y: f64,
    mask_width: f64,
    mask_height: f64,
) -> PipelineResult<PlacementResult> {
    validate(source_width, source_height, mask_width, mask_height)?;
    let scale = (mask_width / source_width).max(mask_height / source_height);
    Ok(place_with_scale(
        scale,
        (source_width, source_height),
        (anchor_x, anchor_y),
        (mask_width, mask_height),
    ))
}

/// Scale the source to fit inside the mask, centred on it. Offsets become non-positive.
pub fn place_contain(
    source_width: f64,
    source_height: f64,
    anchor_x: f64,
    anchor_y: f64,
    mask_width: f64,
    mask_height: f64,
) -> PipelineResult<PlacementResult> {
    validate(source_width, source_height, mask_width, mask_height)?;
    let scale = (mask_width / source_width).min(mask_height / source_height);
    Ok(place_with_scale(
        scale,
        (source_width, source_height),
        (anchor_x, anchor_y),
        (mask_width, mask_height),
    ))
}
