use image::DynamicImage;
use packshot_utils::{config::ResizeQuality, timing_guard};

use crate::error::{PipelineError, PipelineResult};
use crate::model::InferenceEngine;
use crate::postprocess::{PostprocessConfig, Prediction, apply_postprocess};
use crate::preprocess::{PreprocessConfig, preprocess_dynamic_image};

/// Owns the loaded inference engine for the lifetime of a worker.
///
/// The session starts empty; detection before an engine is installed fails with
/// [`PipelineError::EngineNotReady`].
pub struct DetectionSession {
    engine: Option<Box<dyn InferenceEngine>>,
    resize_quality: ResizeQuality,
}

impl Default for DetectionSession {
    fn default() -> Self {
        Self::new(ResizeQuality::default())
    }
}

impl std::fmt::Debug for DetectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionSession")
            .field("ready", &self.is_ready())
            .field("resize_quality", &self.resize_quality)
            .finish()
    }
}

impl DetectionSession {
    pub fn new(resize_quality: ResizeQuality) -> Self {
        Self {
            engine: None,
            resize_quality,
        }
    }

    pub fn with_engine(engine: Box<dyn InferenceEngine>, resize_quality: ResizeQuality) -> Self {
        Self {
            engine: Some(engine),
            resize_quality,
        }
    }

    /// Install (or replace) the engine.
    pub fn install(&mut self, engine: Box<dyn InferenceEngine>) {
        self.engine = Some(engine);
    }

    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }

    /// Detect objects in an in-memory image. Coordinates are in source pixels.
    pub fn detect(
        &self,
        image: &DynamicImage,
        config: &PostprocessConfig,
    ) -> PipelineResult<Vec<Prediction>> {
        let engine = self.engine.as_ref().ok_or(PipelineError::EngineNotReady)?;
        let _guard = timing_guard("packshot_core::detect", log::Level::Debug);

        let prep = preprocess_dynamic_image(
            image,
            &PreprocessConfig {
                input_size: engine.input_size(),
                resize_quality: self.resize_quality,
            },
        )?;

        let raw = {
            let _guard = timing_guard("packshot_core::inference", log::Level::Debug);
            engine.run(prep.tensor)?
        };

        let predictions = {
            let _guard = timing_guard("packshot_core::postprocess", log::Level::Trace);
            apply_postprocess(&raw, &prep.transform, config)?
        };
        log::debug!(
            "{} prediction(s) for {}x{} image",
            predictions.len(),
            prep.original_size.0,
            prep.original_size.1
        );
        Ok(predictions)
    }
}
