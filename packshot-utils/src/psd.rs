//! Minimal layered document writer (Adobe PSD, version 1).
//!
//! Output is 8-bit RGB with uncompressed channel data. Each layer carries its own transparency
//! channel and an optional rectangular user mask; the merged composite is written on top of the
//! document background so viewers without layer support still show the finished canvas.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};

use crate::color::RgbaColor;

/// Largest canvas edge PSD version 1 allows.
pub const PSD_MAX_DIMENSION: u32 = 30_000;

const SIGNATURE: &[u8; 4] = b"8BPS";
const RESOURCE_SIGNATURE: &[u8; 4] = b"8BIM";
const RGB_MODE: u16 = 3;
const RAW: u16 = 0;

/// Rectangle in canvas coordinates that limits where a layer is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskRect {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl MaskRect {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> i64 {
        self.left as i64 + self.width as i64
    }

    pub fn bottom(&self) -> i64 {
        self.top as i64 + self.height as i64
    }

    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= self.left as i64 && x < self.right() && y >= self.top as i64 && y < self.bottom()
    }
}

/// One raster layer. `left`/`top` may be negative or overflow the canvas.
#[derive(Debug, Clone)]
pub struct PsdLayer {
    pub name: String,
    pub left: i32,
    pub top: i32,
    pub image: RgbaImage,
    pub mask: Option<MaskRect>,
}

impl PsdLayer {
    fn bounds(&self) -> MaskRect {
        MaskRect::new(self.left, self.top, self.image.width(), self.image.height())
    }
}

/// Layers listed bottom to top.
#[derive(Debug, Clone)]
pub struct PsdDocument {
    pub width: u32,
    pub height: u32,
    pub background: RgbaColor,
    pub layers: Vec<PsdLayer>,
}

impl PsdDocument {
    pub fn new(width: u32, height: u32, background: RgbaColor) -> Self {
        Self {
            width,
            height,
            background,
            layers: Vec::new(),
        }
    }

    pub fn push_layer(&mut self, layer: PsdLayer) {
        self.layers.push(layer);
    }

    /// Render the visible result: background, then every layer clipped to its mask.
    pub fn flatten(&self) -> RgbaImage {
        let mut canvas = RgbaImage::from_pixel(self.width, self.height, self.background.to_rgba());
        let canvas_rect = MaskRect::new(0, 0, self.width, self.height);

        for layer in &self.layers {
            let bounds = layer.bounds();
            let visible = match layer.mask {
                Some(mask) => intersect(&bounds, &mask).and_then(|m| intersect(&m, &canvas_rect)),
                None => intersect(&bounds, &canvas_rect),
            };
            let Some(visible) = visible else { continue };
            for y in visible.top as i64..visible.bottom() {
                for x in visible.left as i64..visible.right() {
                    let src = layer.image.get_pixel(
                        (x - layer.left as i64) as u32,
                        (y - layer.top as i64) as u32,
                    );
                    blend_over(canvas.get_pixel_mut(x as u32, y as u32), src);
                }
            }
        }
        canvas
    }

    /// Serialize into PSD bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        anyhow::ensure!(
            (1..=PSD_MAX_DIMENSION).contains(&self.width)
                && (1..=PSD_MAX_DIMENSION).contains(&self.height),
            "document size {}x{} is outside the supported 1..={} range",
            self.width,
            self.height,
            PSD_MAX_DIMENSION
        );
        anyhow::ensure!(
            self.layers.len() <= i16::MAX as usize,
            "too many layers ({})",
            self.layers.len()
        );

        let mut out = Vec::new();
        out.extend_from_slice(SIGNATURE);
        put_u16(&mut out, 1);
        out.extend_from_slice(&[0; 6]);
        put_u16(&mut out, 3);
        put_u32(&mut out, self.height);
        put_u32(&mut out, self.width);
        put_u16(&mut out, 8);
        put_u16(&mut out, RGB_MODE);

        // Color mode data and image resources are empty for RGB.
        put_u32(&mut out, 0);
        put_u32(&mut out, 0);

        let layer_info = self.layer_info()?;
        let section_len = 4 + layer_info.len() + 4;
        put_u32(&mut out, to_u32(section_len)?);
        put_u32(&mut out, to_u32(layer_info.len())?);
        out.extend_from_slice(&layer_info);
        // Global layer mask info.
        put_u32(&mut out, 0);

        let composite = flatten_alpha(&self.flatten(), Rgba([255, 255, 255, 255]));
        put_u16(&mut out, RAW);
        for channel in 0..3 {
            out.extend(composite.pixels().map(|p| p[channel]));
        }
        Ok(out)
    }

    fn layer_info(&self) -> Result<Vec<u8>> {
        let mut records = Vec::new();
        let mut channel_data = Vec::new();
        put_u16(&mut records, self.layers.len() as u16);

        for layer in &self.layers {
            let bounds = layer.bounds();
            let pixel_count = layer.image.width() as usize * layer.image.height() as usize;
            let plane_len = to_u32(2 + pixel_count)?;

            put_rect(&mut records, &bounds)?;
            let channel_count: u16 = if layer.mask.is_some() { 5 } else { 4 };
            put_u16(&mut records, channel_count);
            for id in [-1i16, 0, 1, 2] {
                put_i16(&mut records, id);
                put_u32(&mut records, plane_len);
            }
            if let Some(mask) = &layer.mask {
                let mask_len = mask.width as usize * mask.height as usize;
                put_i16(&mut records, -2);
                put_u32(&mut records, to_u32(2 + mask_len)?);
            }

            records.extend_from_slice(RESOURCE_SIGNATURE);
            records.extend_from_slice(b"norm");
            records.extend_from_slice(&[255, 0, 0, 0]);

            let extra = layer_extra(layer)?;
            put_u32(&mut records, to_u32(extra.len())?);
            records.extend_from_slice(&extra);

            for channel in [3usize, 0, 1, 2] {
                put_u16(&mut channel_data, RAW);
                channel_data.extend(layer.image.pixels().map(|p| p[channel]));
            }
            if let Some(mask) = &layer.mask {
                put_u16(&mut channel_data, RAW);
                let mask_len = mask.width as usize * mask.height as usize;
                channel_data.resize(channel_data.len() + mask_len, 255);
            }
        }

        records.extend_from_slice(&channel_data);
        if records.len() % 2 == 1 {
            records.push(0);
        }
        Ok(records)
    }
}

fn layer_extra(layer: &PsdLayer) -> Result<Vec<u8>> {
    let mut extra = Vec::new();

    match &layer.mask {
        Some(mask) => {
            put_u32(&mut extra, 20);
            put_rect(&mut extra, mask)?;
            // Default color 0 hides everything outside the rectangle.
            extra.extend_from_slice(&[0, 0, 0, 0]);
        }
        None => put_u32(&mut extra, 0),
    }

    // Blending ranges.
    put_u32(&mut extra, 0);

    let ascii: Vec<u8> = layer
        .name
        .chars()
        .map(|c| if c.is_ascii() { c as u8 } else { b'?' })
        .take(255)
        .collect();
    extra.push(ascii.len() as u8);
    extra.extend_from_slice(&ascii);
    pad_to(&mut extra, 4);

    let utf16: Vec<u16> = layer.name.encode_utf16().collect();
    let mut unicode = Vec::with_capacity(4 + utf16.len() * 2);
    put_u32(&mut unicode, to_u32(utf16.len())?);
    for unit in utf16 {
        put_u16(&mut unicode, unit);
    }
    pad_to(&mut unicode, 4);
    extra.extend_from_slice(RESOURCE_SIGNATURE);
    extra.extend_from_slice(b"luni");
    put_u32(&mut extra, to_u32(unicode.len())?);
    extra.extend_from_slice(&unicode);

    Ok(extra)
}

fn intersect(a: &MaskRect, b: &MaskRect) -> Option<MaskRect> {
    let left = (a.left as i64).max(b.left as i64);
    let top = (a.top as i64).max(b.top as i64);
    let right = a.right().min(b.right());
    let bottom = a.bottom().min(b.bottom());
    (right > left && bottom > top).then(|| {
        MaskRect::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        )
    })
}

fn flatten_alpha(image: &RgbaImage, background: Rgba<u8>) -> RgbaImage {
    let mut canvas = RgbaImage::from_pixel(image.width(), image.height(), background);
    for (dst, src) in canvas.pixels_mut().zip(image.pixels()) {
        blend_over(dst, src);
    }
    canvas
}

/// Source-over compositing in integer arithmetic; opaque pixels copy exactly.
pub fn blend_over(dst: &mut Rgba<u8>, src: &Rgba<u8>) {
    let src_a = src[3] as u32;
    match src_a {
        0 => {}
        255 => *dst = *src,
        _ => {
            let dst_a = dst[3] as u32 * (255 - src_a) / 255;
            let out_a = src_a + dst_a;
            for c in 0..3 {
                dst[c] = ((src[c] as u32 * src_a + dst[c] as u32 * dst_a) / out_a) as u8;
            }
            dst[3] = out_a as u8;
        }
    }
}

fn put_rect(out: &mut Vec<u8>, rect: &MaskRect) -> Result<()> {
    let bottom = i32::try_from(rect.bottom()).context("layer bottom edge out of range")?;
    let right = i32::try_from(rect.right()).context("layer right edge out of range")?;
    put_i32(out, rect.top);
    put_i32(out, rect.left);
    put_i32(out, bottom);
    put_i32(out, right);
    Ok(())
}

fn pad_to(out: &mut Vec<u8>, multiple: usize) {
    while out.len() % multiple != 0 {
        out.push(0);
    }
}

fn to_u32(len: usize) -> Result<u32> {
    u32::try_from(len).context("PSD section exceeds 4 GiB")
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}
