use anyhow::Result;
use packshot_utils::{config::DetectionSettings, image_utils::LetterboxTransform};
use std::cmp::Ordering;
use tract_onnx::prelude::{Tensor, tract_ndarray::ArrayView2};

/// Columns before the class probabilities: `cx, cy, w, h, objectness`.
const BOX_COLUMNS: usize = 5;
/// Smallest valid row: box, objectness and at least one class.
pub const MIN_COLUMNS: usize = BOX_COLUMNS + 1;

/// Thresholds and geometric filters applied to raw detector output.
#[derive(Debug, Clone, PartialEq)]
pub struct PostprocessConfig {
    /// Minimum objectness for a candidate to survive.
    pub score_threshold: f32,
    /// Same-class candidates overlapping a kept box by more than this IoU are dropped.
    pub nms_threshold: f32,
    /// Cap on candidates entering NMS (0 disables the cap).
    pub top_k: usize,
    pub min_area: Option<f32>,
    pub max_area: Option<f32>,
    pub min_aspect: Option<f32>,
    pub max_aspect: Option<f32>,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        DetectionSettings::default().into()
    }
}

/// Axis-aligned bounding box in image coordinates (top-left origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// `width / height`; zero for a degenerate box.
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            0.0
        }
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        if intersection <= 0.0 {
            return 0.0;
        }

        let union = self.area() + other.area() - intersection;
        if union <= 0.0 { 0.0 } else { intersection / union }
    }
}

/// One detected object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub bbox: BoundingBox,
    /// Objectness in `[0, 1]`.
    pub score: f32,
    /// Index of the most probable class; ties resolve to the lowest index.
    pub class_id: usize,
}

impl Prediction {
    /// `[x, y, width, height]`.
    pub fn bbox_array(&self) -> [f32; 4] {
        [self.bbox.x, self.bbox.y, self.bbox.width, self.bbox.height]
    }
}

/// Decode a detector output tensor into filtered predictions in source-image coordinates.
///
/// Accepts `[N, C]` or `[1, N, C]` with `C >= 6`.
pub fn apply_postprocess(
    output: &Tensor,
    transform: &LetterboxTransform,
    config: &PostprocessConfig,
) -> Result<Vec<Prediction>> {
    let rows = detection_rows(output)?;
    Ok(postprocess_rows(rows, transform, config))
}

/// Row-level pipeline: confidence filter, sort, top-k, per-class NMS, geometric filters.
pub fn postprocess_rows(
    rows: ArrayView2<'_, f32>,
    transform: &LetterboxTransform,
    config: &PostprocessConfig,
) -> Vec<Prediction> {
    let mut candidates = Vec::new();
    for row in rows.rows() {
        let score = row[4];
        if !score.is_finite() || score < config.score_threshold {
            continue;
        }
        let (cx, cy, w, h) = (row[0], row[1], row[2], row[3]);
        if !(w > 0.0 && h > 0.0) {
            continue;
        }

        let mut class_id = 0;
        let mut best = f32::NEG_INFINITY;
        for (index, &prob) in row.iter().skip(BOX_COLUMNS).enumerate() {
            if prob > best {
                best = prob;
                class_id = index;
            }
        }

        let (x, y) = transform.to_source(cx - w / 2.0, cy - h / 2.0);
        candidates.push(Prediction {
            bbox: BoundingBox {
                x,
                y,
                width: transform.length_to_source(w),
                height: transform.length_to_source(h),
            },
            score,
            class_id,
        });
    }

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    if config.top_k > 0 && candidates.len() > config.top_k {
        candidates.truncate(config.top_k);
    }

    if config.nms_threshold > 0.0 && candidates.len() > 1 {
        candidates = non_max_suppression(candidates, config.nms_threshold);
    }

    candidates.retain(|p| passes_filters(&p.bbox, config));
    candidates
}

/// Largest-area prediction, the usual seed for an editable region.
pub fn largest_prediction(predictions: &[Prediction]) -> Option<&Prediction> {
    predictions.iter().max_by(|a, b| {
        a.bbox
            .area()
            .partial_cmp(&b.bbox.area())
            .unwrap_or(Ordering::Equal)
    })
}

fn detection_rows(output: &Tensor) -> Result<ArrayView2<'_, f32>> {
    let (rows, cols) = match output.shape() {
        [rows, cols] => (*rows, *cols),
        [1, rows, cols] => (*rows, *cols),
        other => anyhow::bail!(
            "detector output must have shape [N, C] or [1, N, C] (got {:?})",
            other
        ),
    };
    anyhow::ensure!(
        cols >= MIN_COLUMNS,
        "detector output needs at least {MIN_COLUMNS} columns per row (got {cols})"
    );

    let slice = output
        .as_slice::<f32>()
        .map_err(|e| anyhow::anyhow!("detector output is not f32: {e}"))?;

    ArrayView2::from_shape((rows, cols), slice)
        .map_err(|_| anyhow::anyhow!("detector output data is not contiguous"))
}

/// Greedy per-class NMS over score-sorted candidates.
fn non_max_suppression(candidates: Vec<Prediction>, threshold: f32) -> Vec<Prediction> {
    let mut kept: Vec<Prediction> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && candidate.bbox.iou(&k.bbox) > threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}

fn passes_filters(bbox: &BoundingBox, config: &PostprocessConfig) -> bool {
    let area = bbox.area();
    let aspect = bbox.aspect();
    config.min_area.is_none_or(|min| area >= min)
        && config.max_area.is_none_or(|max| area <= max)
        && config.min_aspect.is_none_or(|min| aspect >= min)
        && config.max_aspect.is_none_or(|max| aspect <= max)
}

impl From<DetectionSettings> for PostprocessConfig {
    fn from(settings: DetectionSettings) -> Self {
        PostprocessConfig {
            score_threshold: settings.score_threshold,
            nms_threshold: settings.nms_threshold,
            top_k: settings.top_k,
            min_area: settings.min_area,
            max_area: settings.max_area,
            min_aspect: settings.min_aspect,
            max_aspect: settings.max_aspect,
        }
    }
}

impl From<&DetectionSettings> for PostprocessConfig {
    fn from(settings: &DetectionSettings) -> Self {
        settings.clone().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor_from_rows<const C: usize>(rows: &[[f32; C]]) -> Tensor {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Tensor::from_shape(&[rows.len(), C], &flat).unwrap()
    }

    fn run(tensor: &Tensor, config: &PostprocessConfig) -> Vec<Prediction> {
        apply_postprocess(tensor, &LetterboxTransform::identity(), config)
            .expect("postprocess should succeed")
    }

    #[test]
    fn centre_box_becomes_top_left_prediction() {
        let tensor = tensor_from_rows(&[[320.0, 320.0, 64.0, 128.0, 0.9, 1.0]]);
        let predictions = run(&tensor, &PostprocessConfig::default());

        assert_eq!(predictions.len(), 1);
        let p = predictions[0];
        assert_eq!(p.bbox_array(), [288.0, 256.0, 64.0, 128.0]);
        assert_eq!(p.class_id, 0);
        assert!((p.score - 0.9).abs() < 1e-6);
    }

    #[test]
    fn min_area_filters_small_boxes() {
        let tensor = tensor_from_rows(&[[320.0, 320.0, 64.0, 128.0, 0.9, 1.0]]);
        let config = PostprocessConfig {
            min_area: Some(10_000.0),
            ..PostprocessConfig::default()
        };
        assert!(run(&tensor, &config).is_empty());
    }

    #[test]
    fn aspect_and_max_area_bounds_apply() {
        // 64x128 has aspect 0.5 and area 8192.
        let tensor = tensor_from_rows(&[[320.0, 320.0, 64.0, 128.0, 0.9, 1.0]]);
        let too_narrow = PostprocessConfig {
            min_aspect: Some(0.75),
            ..PostprocessConfig::default()
        };
        assert!(run(&tensor, &too_narrow).is_empty());

        let too_big = PostprocessConfig {
            max_area: Some(8000.0),
            ..PostprocessConfig::default()
        };
        assert!(run(&tensor, &too_big).is_empty());

        let fits = PostprocessConfig {
            min_aspect: Some(0.5),
            max_aspect: Some(0.5),
            max_area: Some(8192.0),
            ..PostprocessConfig::default()
        };
        assert_eq!(run(&tensor, &fits).len(), 1);
    }

    #[test]
    fn drops_low_confidence_and_degenerate_rows() {
        let tensor = tensor_from_rows(&[
            [50.0, 50.0, 10.0, 10.0, 0.1, 1.0],
            [50.0, 50.0, 0.0, 10.0, 0.9, 1.0],
            [50.0, 50.0, 10.0, 10.0, f32::NAN, 1.0],
            [80.0, 80.0, 10.0, 10.0, 0.3, 1.0],
        ]);
        let predictions = run(&tensor, &PostprocessConfig::default());
        assert_eq!(predictions.len(), 1);
        assert!((predictions[0].score - 0.3).abs() < 1e-6);
    }

    #[test]
    fn nms_is_per_class() {
        let tensor = tensor_from_rows(&[
            [10.0, 10.0, 20.0, 20.0, 0.95, 0.9, 0.1],
            [11.0, 11.0, 20.0, 20.0, 0.90, 0.8, 0.2],
            [11.0, 11.0, 20.0, 20.0, 0.85, 0.1, 0.9],
        ]);
        let predictions = run(&tensor, &PostprocessConfig::default());

        assert_eq!(predictions.len(), 2);
        assert_eq!(predictions[0].class_id, 0);
        assert!((predictions[0].score - 0.95).abs() < 1e-6);
        assert_eq!(predictions[1].class_id, 1);
    }

    #[test]
    fn class_ties_resolve_to_lowest_index() {
        let tensor = tensor_from_rows(&[[5.0, 5.0, 4.0, 4.0, 0.8, 0.2, 0.4, 0.4]]);
        let predictions = run(&tensor, &PostprocessConfig::default());
        assert_eq!(predictions[0].class_id, 1);
    }

    #[test]
    fn top_k_caps_candidates() {
        let tensor = tensor_from_rows(&[
            [10.0, 10.0, 4.0, 4.0, 0.5, 1.0],
            [100.0, 100.0, 4.0, 4.0, 0.9, 1.0],
            [200.0, 200.0, 4.0, 4.0, 0.7, 1.0],
        ]);
        let config = PostprocessConfig {
            top_k: 2,
            ..PostprocessConfig::default()
        };
        let scores: Vec<f32> = run(&tensor, &config).iter().map(|p| p.score).collect();
        assert_eq!(scores, vec![0.9, 0.7]);
    }

    #[test]
    fn handles_batched_shape_and_letterbox_mapping() {
        let tensor = Tensor::from_shape(&[1, 1, 6], &[320.0f32, 320.0, 64.0, 64.0, 0.9, 1.0])
            .unwrap();
        let transform = LetterboxTransform::compute((1280, 640), (640, 640)).unwrap();
        let predictions =
            apply_postprocess(&tensor, &transform, &PostprocessConfig::default()).unwrap();

        assert_eq!(predictions.len(), 1);
        // Model space (288, 288, 64, 64) minus the 160px top pad, scaled by 2.
        assert_eq!(predictions[0].bbox_array(), [576.0, 256.0, 128.0, 128.0]);
    }

    #[test]
    fn rejects_narrow_or_misshapen_output() {
        let narrow = Tensor::from_shape(&[1, 5], &[0.0f32; 5]).unwrap();
        assert!(
            apply_postprocess(
                &narrow,
                &LetterboxTransform::identity(),
                &PostprocessConfig::default()
            )
            .is_err()
        );

        let cube = Tensor::from_shape(&[2, 1, 6], &[0.0f32; 12]).unwrap();
        assert!(
            apply_postprocess(
                &cube,
                &LetterboxTransform::identity(),
                &PostprocessConfig::default()
            )
            .is_err()
        );
    }

    #[test]
    fn largest_prediction_prefers_area_over_score() {
        let small = Prediction {
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 10.0,
                height: 10.0,
            },
            score: 0.99,
            class_id: 0,
        };
        let big = Prediction {
            bbox: BoundingBox {
                width: 50.0,
                height: 40.0,
                ..small.bbox
            },
            score: 0.4,
            class_id: 0,
        };
        assert_eq!(largest_prediction(&[small, big]), Some(&big));
        assert_eq!(largest_prediction(&[]), None);
    }

    #[test]
    fn converts_detection_settings_into_config() {
        let settings = DetectionSettings {
            score_threshold: 0.75,
            nms_threshold: 0.25,
            top_k: 123,
            min_area: Some(10.0),
            ..DetectionSettings::default()
        };

        let config: PostprocessConfig = (&settings).into();
        assert_eq!(config.score_threshold, 0.75);
        assert_eq!(config.nms_threshold, 0.25);
        assert_eq!(config.top_k, 123);
        assert_eq!(config.min_area, Some(10.0));
        assert_eq!(config.max_aspect, None);
    }
}
