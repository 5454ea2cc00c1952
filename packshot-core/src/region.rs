//! Editable crop rectangle in source-image pixels.

use crate::error::{PipelineError, PipelineResult};
use crate::postprocess::BoundingBox;

/// Crop rectangle in source-image pixel coordinates. Width and height are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> PipelineResult<Self> {
        if width == 0 || height == 0 {
            return Err(PipelineError::InvalidGeometry {
                width: width as f64,
                height: height as f64,
            });
        }
        Ok(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Region covering the whole image.
    pub fn full(image_width: u32, image_height: u32) -> PipelineResult<Self> {
        Self::new(0, 0, image_width, image_height)
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    /// Intersection with the image bounds.
    pub fn clamped(&self, image_width: u32, image_height: u32) -> PipelineResult<Self> {
        let x = self.x.min(image_width);
        let y = self.y.min(image_height);
        let right = self.right().min(image_width);
        let bottom = self.bottom().min(image_height);
        Self::new(x, y, right - x, bottom - y)
    }

    /// Snap a floating-point box outward to whole pixels and clamp it to the image.
    pub fn from_bbox(
        bbox: &BoundingBox,
        image_width: u32,
        image_height: u32,
    ) -> PipelineResult<Self> {
        let left = bbox.x.floor().clamp(0.0, image_width as f32) as u32;
        let top = bbox.y.floor().clamp(0.0, image_height as f32) as u32;
        let right = (bbox.x + bbox.width).ceil().clamp(0.0, image_width as f32) as u32;
        let bottom = (bbox.y + bbox.height).ceil().clamp(0.0, image_height as f32) as u32;
        Self::new(
            left,
            top,
            right.saturating_sub(left),
            bottom.saturating_sub(top),
        )
    }

    /// Centred square inset by `pad` on the short side; used when nothing usable was detected.
    pub fn center_square(image_width: u32, image_height: u32, pad: u32) -> PipelineResult<Self> {
        let short = image_width.min(image_height);
        let inset = short.saturating_sub(pad.saturating_mul(2));
        let side = if inset == 0 { short } else { inset };
        Self::new(
            (image_width - side) / 2,
            (image_height - side) / 2,
            side,
            side,
        )
    }

    /// Grow by `pad` on every side, clamped to the image.
    pub fn expand(&self, pad: u32, image_width: u32, image_height: u32) -> PipelineResult<Self> {
        let x = self.x.saturating_sub(pad);
        let y = self.y.saturating_sub(pad);
        let right = self.right().saturating_add(pad).min(image_width);
        let bottom = self.bottom().saturating_add(pad).min(image_height);
        Self::new(x, y, right.saturating_sub(x), bottom.saturating_sub(y))
    }

    /// Grow symmetrically toward `ratio` (width / height), then by `pad`, clamped to the image.
    ///
    /// A cover fit of the result at that ratio keeps the whole original region in view.
    pub fn expand_to_aspect(
        &self,
        ratio: f64,
        pad: u32,
        image_width: u32,
        image_height: u32,
    ) -> PipelineResult<Self> {
        if !(ratio.is_finite() && ratio > 0.0) {
            return Err(PipelineError::InvalidGeometry {
                width: ratio,
                height: 1.0,
            });
        }
        let (mut left, mut top) = (i64::from(self.x), i64::from(self.y));
        let (mut right, mut bottom) = (i64::from(self.right()), i64::from(self.bottom()));
        let (width, height) = (i64::from(self.width), i64::from(self.height));

        if (self.width as f64 / self.height as f64) < ratio {
            let grow = ((self.height as f64 * ratio) as i64 - width) / 2;
            left -= grow;
            right += grow;
        } else {
            let grow = ((self.width as f64 / ratio) as i64 - height) / 2;
            top -= grow;
            bottom += grow;
        }

        let pad = i64::from(pad);
        let left = (left - pad).max(0);
        let top = (top - pad).max(0);
        let right = (right + pad).min(i64::from(image_width));
        let bottom = (bottom + pad).min(i64::from(image_height));
        Self::new(
            left as u32,
            top as u32,
            (right - left).max(0) as u32,
            (bottom - top).max(0) as u32,
        )
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_regions() {
        assert!(matches!(
            Region::new(0, 0, 0, 5),
            Err(PipelineError::InvalidGeometry { .. })
        ));
        assert!(Region::new(3, 4, 1, 1).is_ok());
    }

    #[test]
    fn from_bbox_snaps_outward_and_clamps() {
        let bbox = BoundingBox {
            x: -4.5,
            y: 10.2,
            width: 50.0,
            height: 500.0,
        };
        let region = Region::from_bbox(&bbox, 100, 200).unwrap();
        assert_eq!(region, Region::new(0, 10, 46, 190).unwrap());

        let outside = BoundingBox {
            x: 150.0,
            y: 0.0,
            width: 10.0,
            height: 10.0,
        };
        assert!(Region::from_bbox(&outside, 100, 200).is_err());
    }

    #[test]
    fn center_square_insets_by_pad() {
        assert_eq!(
            Region::center_square(1200, 800, 40).unwrap(),
            Region::new(240, 40, 720, 720).unwrap()
        );
        // A pad larger than the image falls back to the full short side.
        assert_eq!(
            Region::center_square(50, 30, 40).unwrap(),
            Region::new(10, 0, 30, 30).unwrap()
        );
    }

    #[test]
    fn expand_and_clamp_stay_inside_image() {
        let region = Region::new(10, 5, 20, 20).unwrap();
        assert_eq!(
            region.expand(8, 35, 100).unwrap(),
            Region::new(2, 0, 33, 33).unwrap()
        );

        let overflowing = Region::new(90, 90, 50, 50).unwrap();
        assert_eq!(
            overflowing.clamped(100, 120).unwrap(),
            Region::new(90, 90, 10, 30).unwrap()
        );
        assert!(Region::new(200, 0, 5, 5).unwrap().clamped(100, 100).is_err());
    }

    #[test]
    fn expand_to_aspect_grows_the_short_axis() {
        // 2:1 box into a square target: height grows by 50 on each side, then the pad.
        let wide = Region::new(100, 100, 200, 100).unwrap();
        assert_eq!(
            wide.expand_to_aspect(1.0, 10, 1000, 1000).unwrap(),
            Region::new(90, 40, 220, 220).unwrap()
        );

        // Square box into a 1:2 portrait target without padding.
        let square = Region::new(100, 100, 100, 100).unwrap();
        assert_eq!(
            square.expand_to_aspect(0.5, 0, 300, 250).unwrap(),
            Region::new(100, 50, 100, 200).unwrap()
        );
    }

    #[test]
    fn expand_to_aspect_clamps_at_image_edges() {
        // Width grows to 80 (20 per side) and pads by 5; the left edge clips at zero.
        let region = Region::new(10, 10, 40, 20).unwrap();
        assert_eq!(
            region.expand_to_aspect(4.0, 5, 100, 100).unwrap(),
            Region::new(0, 5, 75, 30).unwrap()
        );
        assert!(region.expand_to_aspect(0.0, 5, 100, 100).is_err());
        assert!(region.expand_to_aspect(f64::NAN, 5, 100, 100).is_err());
    }
}
