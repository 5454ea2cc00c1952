use std::{fmt::Write, path::Path};

use anyhow::{Context, Result};
use log::{debug, warn};
use tract_onnx::prelude::{
    Datum, Framework, Graph, InferenceFact, InferenceModelExt, IntoTensor, SimplePlan, Tensor,
    TypedFact, TypedOp, tvec,
};

use crate::preprocess::InputSize;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Object detector backend.
///
/// Takes a `[1, 3, H, W]` input tensor and returns raw rows `(cx, cy, w, h, objectness,
/// class scores...)` in model-input coordinates, shaped `[N, C]` or `[1, N, C]`.
pub trait InferenceEngine: Send {
    fn input_size(&self) -> InputSize;

    fn run(&self, input: Tensor) -> Result<Tensor>;
}

/// Builds an engine on the worker thread during `Init`.
pub type EngineFactory = Box<dyn FnOnce() -> Result<Box<dyn InferenceEngine>> + Send>;

/// ONNX detection model executed with tract.
#[derive(Debug)]
pub struct OnnxModel {
    runnable: RunnableModel,
    input_size: InputSize,
}

impl OnnxModel {
    /// Load the graph with a fixed `[1, 3, H, W]` input, preferring the optimized plan.
    pub fn load<P: AsRef<Path>>(model_path: P, input_size: InputSize) -> Result<Self> {
        let path = model_path.as_ref();
        anyhow::ensure!(path.exists(), "model file not found: {}", path.display());

        let runnable = match load_runnable_model(path, input_size, true) {
            Ok(model) => {
                debug!(
                    "Detection model {} optimized ({}x{})",
                    path.display(),
                    input_size.width,
                    input_size.height
                );
                model
            }
            Err(opt_err) => {
                let mut chain = String::new();
                for cause in opt_err.chain() {
                    let _ = writeln!(&mut chain, "  - {cause}");
                }
                warn!(
                    "Detection model {} failed optimized load; using the decluttered graph.\n{}",
                    path.display(),
                    chain.trim_end()
                );
                load_runnable_model(path, input_size, false).with_context(|| {
                    format!("decluttered load also failed after optimize error: {opt_err}")
                })?
            }
        };

        Ok(Self {
            runnable,
            input_size,
        })
    }

    /// Engine factory that loads `model_path` when the worker initializes.
    pub fn factory(model_path: impl AsRef<Path>, input_size: InputSize) -> EngineFactory {
        let path = model_path.as_ref().to_path_buf();
        Box::new(move || -> Result<Box<dyn InferenceEngine>> {
            let model = OnnxModel::load(&path, input_size)?;
            Ok(Box::new(model) as Box<dyn InferenceEngine>)
        })
    }
}

impl InferenceEngine for OnnxModel {
    fn input_size(&self) -> InputSize {
        self.input_size
    }

    fn run(&self, input: Tensor) -> Result<Tensor> {
        let outputs = self
            .runnable
            .run(tvec![input.into()])
            .map_err(|e| anyhow::anyhow!("model execution failed: {e}"))?;

        outputs
            .into_iter()
            .next()
            .map(|value| value.into_tensor())
            .ok_or_else(|| anyhow::anyhow!("model produced no outputs"))
    }
}

fn load_runnable_model(
    path: &Path,
    input_size: InputSize,
    optimized: bool,
) -> Result<RunnableModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(
            1,
            3,
            input_size.height as usize,
            input_size.width as usize
        ),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to parse ONNX graph from {}", path.display()))?
        .with_input_fact(0, input_fact)
        .map_err(|e| anyhow::anyhow!("unable to pin model input shape: {e}"))?;

    if optimized {
        model
            .into_optimized()
            .map_err(|e| anyhow::anyhow!("unable to optimize graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    } else {
        model
            .into_typed()
            .map_err(|e| anyhow::anyhow!("unable to type-check graph: {e}"))?
            .into_decluttered()
            .map_err(|e| anyhow::anyhow!("unable to declutter graph: {e}"))?
            .into_runnable()
            .map_err(|e| anyhow::anyhow!("unable to make graph runnable: {e}"))
    }
}
