//! Layered-document assembly and multi-image grid geometry.
//!
//! A [`LayoutJob`] is a list of already-scaled rasters with their canvas position and a
//! rectangular visibility mask. [`build_layout`] turns it into a [`PsdDocument`] without any
//! resampling; [`grid_cells`] computes the masks for multi-image canvases.

use anyhow::Result;
use image::RgbaImage;
use log::warn;
use packshot_utils::{
    color::RgbaColor,
    config::LayoutPattern,
    psd::{MaskRect, PsdDocument, PsdLayer},
};

use crate::error::{PipelineError, PipelineResult};

/// One layer of a layout job.
#[derive(Debug, Clone)]
pub struct LayoutLayer {
    /// Usually the source file stem; kept verbatim.
    pub layer_name: String,
    pub raster: RgbaImage,
    pub left: i32,
    pub top: i32,
    pub mask: MaskRect,
}

/// Layers bottom to top, in input order.
pub type LayoutJob = Vec<LayoutLayer>;

/// Serializes a layered document into bytes for a destination.
pub trait DocumentSerializer: Send {
    /// File extension without the dot.
    fn extension(&self) -> &'static str;

    fn serialize(&self, document: &PsdDocument) -> Result<Vec<u8>>;
}

/// Writes Photoshop documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct PsdSerializer;

impl DocumentSerializer for PsdSerializer {
    fn extension(&self) -> &'static str {
        "psd"
    }

    fn serialize(&self, document: &PsdDocument) -> Result<Vec<u8>> {
        document.to_bytes()
    }
}

/// Convert a job into a document, one raster layer per entry.
pub fn build_layout(
    job: LayoutJob,
    canvas_width: u32,
    canvas_height: u32,
    background: RgbaColor,
) -> PsdDocument {
    let mut document = PsdDocument::new(canvas_width, canvas_height, background);
    for layer in job {
        document.push_layer(PsdLayer {
            name: layer.layer_name,
            left: layer.left,
            top: layer.top,
            image: layer.raster,
            mask: Some(layer.mask),
        });
    }
    document
}

/// Rows of roughly equal length: `ceil(sqrt(n))` rows, longer rows at the bottom.
pub fn balanced_rows(count: usize) -> Vec<u32> {
    if count == 0 {
        return Vec::new();
    }
    let rows = (count as f64).sqrt().ceil() as usize;
    let base = count / rows;
    let extra = count % rows;
    (0..rows)
        .map(|row| (base + usize::from(row >= rows - extra)) as u32)
        .collect()
}

/// Cell rectangles for `count` images on a `canvas_width` x `canvas_height` canvas.
///
/// Uses the pattern's configured rows for `count` when they add up to `count`, otherwise
/// [`balanced_rows`]. Every row has height `(H - gutter * (rows - 1)) / rows`; each cell in a
/// row with `cols` images is `(W - gutter * (cols - 1)) / cols` wide.
pub fn grid_cells(
    count: usize,
    canvas_width: u32,
    canvas_height: u32,
    pattern: &LayoutPattern,
) -> PipelineResult<Vec<MaskRect>> {
    let rows: Vec<u32> = match pattern.rows_for(count) {
        Some(rows) if rows.iter().map(|&r| r as usize).sum::<usize>() == count => rows
            .iter()
            .copied()
            .filter(|&cols| cols > 0)
            .collect(),
        Some(rows) => {
            warn!(
                "Row pattern {:?} does not place {} image(s); using balanced rows",
                rows, count
            );
            balanced_rows(count)
        }
        None => balanced_rows(count),
    };
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let gutter = pattern.gutter;
    let row_count = rows.len() as u32;
    let row_height = span(canvas_height, row_count, gutter).ok_or(
        PipelineError::InvalidGeometry {
            width: canvas_width as f64,
            height: canvas_height as f64,
        },
    )?;

    let mut cells = Vec::with_capacity(count);
    let mut top = 0u32;
    for cols in rows {
        let cell_width = span(canvas_width, cols, gutter).ok_or(PipelineError::InvalidGeometry {
            width: canvas_width as f64,
            height: canvas_height as f64,
        })?;
        for col in 0..cols {
            let left = col * (cell_width + gutter);
            cells.push(MaskRect::new(
                left as i32,
                top as i32,
                cell_width,
                row_height,
            ));
        }
        top += row_height + gutter;
    }
    Ok(cells)
}

/// Size of one of `parts` equal spans separated by `gutter`; `None` when nothing is left.
fn span(total: u32, parts: u32, gutter: u32) -> Option<u32> {
    let gaps = gutter.checked_mul(parts.saturating_sub(1))?;
    let size = total.checked_sub(gaps)? / parts.max(1);
    (size > 0).then_some(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use std::collections::BTreeMap;

    fn pattern(gutter: u32, rows: &[(usize, Vec<u32>)]) -> LayoutPattern {
        LayoutPattern {
            gutter,
            background: "#ffffff".into(),
            rows: rows
                .iter()
                .map(|(count, r)| (count.to_string(), r.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn balanced_rows_spread_evenly() {
        assert_eq!(balanced_rows(0), Vec::<u32>::new());
        assert_eq!(balanced_rows(1), vec![1]);
        assert_eq!(balanced_rows(3), vec![1, 2]);
        assert_eq!(balanced_rows(4), vec![2, 2]);
        assert_eq!(balanced_rows(5), vec![1, 2, 2]);
        assert_eq!(balanced_rows(7), vec![2, 2, 3]);
    }

    #[test]
    fn configured_pattern_drives_cells() {
        let pattern = pattern(10, &[(3, vec![1, 2])]);
        let cells = grid_cells(3, 1000, 610, &pattern).unwrap();
        assert_eq!(
            cells,
            vec![
                MaskRect::new(0, 0, 1000, 300),
                MaskRect::new(0, 310, 495, 300),
                MaskRect::new(505, 310, 495, 300),
            ]
        );
    }

    #[test]
    fn mismatched_pattern_falls_back_to_balanced() {
        let pattern = pattern(0, &[(4, vec![3])]);
        let cells = grid_cells(4, 400, 400, &pattern).unwrap();
        assert_eq!(cells.len(), 4);
        assert!(cells.iter().all(|c| c.width == 200 && c.height == 200));
    }

    #[test]
    fn oversized_gutter_is_invalid_geometry() {
        let pattern = pattern(500, &[]);
        assert!(matches!(
            grid_cells(2, 100, 100, &pattern),
            Err(PipelineError::InvalidGeometry { .. })
        ));
    }

    #[test]
    fn build_layout_keeps_order_names_and_masks() {
        let job = vec![
            LayoutLayer {
                layer_name: "IMG_0001".into(),
                raster: RgbaImage::from_pixel(6, 4, Rgba([255, 0, 0, 255])),
                left: -1,
                top: 0,
                mask: MaskRect::new(0, 0, 4, 4),
            },
            LayoutLayer {
                layer_name: "IMG_0002".into(),
                raster: RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255])),
                left: 4,
                top: 0,
                mask: MaskRect::new(4, 0, 4, 4),
            },
        ];
        let document = build_layout(job, 8, 4, RgbaColor::WHITE);

        let names: Vec<_> = document.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["IMG_0001", "IMG_0002"]);
        assert_eq!(document.layers[0].mask, Some(MaskRect::new(0, 0, 4, 4)));
        assert_eq!(document.layers[0].image.dimensions(), (6, 4));

        let flat = document.flatten();
        assert_eq!(flat.get_pixel(3, 0).0, [255, 0, 0, 255]);
        assert_eq!(flat.get_pixel(4, 0).0, [0, 255, 0, 255]);

        let bytes = PsdSerializer.serialize(&document).unwrap();
        assert_eq!(&bytes[..4], b"8BPS");
    }
}
