use thiserror::Error;

/// Failure taxonomy of the detection-to-export pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Detection was requested before the worker loaded an inference engine.
    #[error("Inference engine is not initialized")]
    EngineNotReady,
    #[error("Invalid geometry: source size {width}x{height} must be positive")]
    InvalidGeometry { width: f64, height: f64 },
    #[error("Directory handle not available")]
    DestinationUnavailable,
    #[error("{size}: {reason}")]
    CompositionFailure { size: String, reason: String },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
