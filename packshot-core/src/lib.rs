//! Core packshot pipeline.
//!
//! Runs an ONNX object detector with `tract-onnx`, turns the strongest box into a crop region,
//! and renders that region into every target size of a set of output profiles.

/// Crop, cover placement and per-size rendering.
pub mod compose;
/// Detection session around an inference engine.
pub mod detector;
pub mod error;
/// Multi-profile export to a destination.
pub mod export;
/// Layered documents and grid geometry.
pub mod layout;
/// ONNX model loading and execution.
pub mod model;
pub mod placement;
/// Detection post-processing (decode, score filtering, NMS).
pub mod postprocess;
/// Image pre-processing (letterbox, tensor conversion).
pub mod preprocess;
pub mod region;
/// Background pipeline thread.
pub mod worker;

pub use compose::{
    ComposePayload, ComposedImage, Composition, Compositor, ImageRasterOps, LayoutItem,
    LayoutOutput, ProgressEvent, RasterOps, SizeFailure,
};
pub use detector::DetectionSession;
pub use error::{PipelineError, PipelineResult};
pub use export::{
    Destination, DirectoryDestination, ExportArtifact, ExportOptions, ExportResult, Exporter,
    calculate_file_count, calculate_total_file_count, export_formats,
};
pub use layout::{
    DocumentSerializer, LayoutJob, LayoutLayer, PsdSerializer, balanced_rows, build_layout,
    grid_cells,
};
pub use model::{EngineFactory, InferenceEngine, OnnxModel};
pub use placement::{PlacementResult, SourceWindow, place_contain, place_cover};
pub use postprocess::{
    BoundingBox, PostprocessConfig, Prediction, apply_postprocess, largest_prediction,
};
pub use preprocess::{
    InputSize, PreprocessConfig, PreprocessOutput, preprocess_dynamic_image, preprocess_image,
};
pub use region::Region;
pub use worker::{Request, Response, WorkerHandle, WorkerSettings, spawn_worker};

/// Returns the crate version for diagnostics.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
