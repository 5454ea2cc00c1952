//! Dedicated pipeline thread.
//!
//! Callers talk to the worker through a typed request channel; responses and progress come back
//! on two separate receivers. Requests run strictly one at a time, in arrival order.

use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use anyhow::Result;
use image::DynamicImage;
use log::{debug, info};
use packshot_utils::{
    config::{AppSettings, LayoutPattern, ResizeQuality},
    profiles::ProfileSet,
};

use crate::compose::{
    ComposePayload, ComposedImage, Compositor, ImageRasterOps, LayoutItem, ProgressEvent,
};
use crate::detector::DetectionSession;
use crate::error::PipelineError;
use crate::export::{Destination, ExportOptions, ExportResult, Exporter};
use crate::layout::{DocumentSerializer, PsdSerializer, build_layout};
use crate::model::EngineFactory;
use crate::postprocess::{PostprocessConfig, Prediction};

/// Work accepted by the pipeline thread.
pub enum Request {
    /// Build the inference engine. Answered with `Ready` or `Error`.
    Init,
    Detect {
        file_id: String,
        image: DynamicImage,
    },
    /// Render one configured profile without writing anything.
    Compose {
        profile_key: String,
        payload: ComposePayload,
    },
    /// Combine several images onto one canvas.
    ComposeMany {
        profile_key: String,
        items: Vec<LayoutItem>,
        canvas: (u32, u32),
        pattern: LayoutPattern,
    },
    Export {
        payload: ComposePayload,
        profiles: ProfileSet,
        destination: Box<dyn Destination>,
    },
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Request::Init => "init",
            Request::Detect { .. } => "detect",
            Request::Compose { .. } => "compose",
            Request::ComposeMany { .. } => "compose_many",
            Request::Export { .. } => "export",
        }
    }
}

/// Answer to one [`Request`].
#[derive(Debug)]
pub enum Response {
    Ready,
    Detect {
        file_id: String,
        predictions: Vec<Prediction>,
    },
    Compose {
        profile_key: String,
        images: Vec<ComposedImage>,
        document: Option<Vec<u8>>,
        errors: Vec<String>,
    },
    ComposeMany {
        profile_key: String,
        outputs: Vec<ComposedImage>,
        document: Option<Vec<u8>>,
    },
    Export(ExportResult),
    Error {
        request: &'static str,
        error: PipelineError,
    },
}

/// Everything the worker needs besides the engine.
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    pub postprocess: PostprocessConfig,
    pub resize_quality: ResizeQuality,
    pub export: ExportOptions,
    /// Profiles available to `Compose` requests.
    pub profiles: ProfileSet,
}

impl WorkerSettings {
    pub fn from_app_settings(settings: &AppSettings, profiles: ProfileSet) -> Self {
        Self {
            postprocess: (&settings.detection).into(),
            resize_quality: settings.input.resize_quality,
            export: ExportOptions::from_settings(&settings.output),
            profiles,
        }
    }
}

/// Channels to a running worker.
pub struct WorkerHandle {
    requests: Sender<Request>,
    responses: Receiver<Response>,
    progress: Receiver<ProgressEvent>,
    thread: JoinHandle<()>,
}

impl WorkerHandle {
    /// Queue a request. Fails only if the worker thread has exited.
    pub fn send(&self, request: Request) -> Result<()> {
        self.requests
            .send(request)
            .map_err(|_| anyhow::anyhow!("pipeline worker has stopped"))
    }

    /// Block until the next response.
    pub fn recv(&self) -> Result<Response> {
        self.responses
            .recv()
            .map_err(|_| anyhow::anyhow!("pipeline worker has stopped"))
    }

    /// Send a request and wait for its response.
    pub fn call(&self, request: Request) -> Result<Response> {
        self.send(request)?;
        self.recv()
    }

    pub fn progress(&self) -> &Receiver<ProgressEvent> {
        &self.progress
    }

    /// Close the request channel and wait for the thread to finish queued work.
    pub fn shutdown(self) -> Result<()> {
        drop(self.requests);
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("pipeline worker panicked"))
    }
}

/// Start the pipeline thread. The engine is built by `factory` when `Init` arrives.
pub fn spawn_worker(factory: EngineFactory, settings: WorkerSettings) -> Result<WorkerHandle> {
    let (request_tx, request_rx) = mpsc::channel::<Request>();
    let (response_tx, response_rx) = mpsc::channel::<Response>();
    let (progress_tx, progress_rx) = mpsc::channel::<ProgressEvent>();

    let thread = thread::Builder::new()
        .name("packshot-pipeline".into())
        .spawn(move || {
            let mut worker = Worker::new(factory, settings, progress_tx);
            for request in request_rx {
                let response = worker.handle(request);
                if response_tx.send(response).is_err() {
                    break;
                }
            }
            debug!("Pipeline worker exiting");
        })?;

    Ok(WorkerHandle {
        requests: request_tx,
        responses: response_rx,
        progress: progress_rx,
        thread,
    })
}

struct Worker {
    factory: Option<EngineFactory>,
    session: DetectionSession,
    exporter: Exporter,
    settings: WorkerSettings,
}

impl Worker {
    fn new(
        factory: EngineFactory,
        settings: WorkerSettings,
        progress: Sender<ProgressEvent>,
    ) -> Self {
        let compositor = Compositor::new(
            Box::new(ImageRasterOps::default()),
            Box::new(PsdSerializer),
            Some(progress),
        );
        Self {
            factory: Some(factory),
            session: DetectionSession::new(settings.resize_quality),
            exporter: Exporter::new(compositor, settings.export.clone()),
            settings,
        }
    }

    fn handle(&mut self, request: Request) -> Response {
        let name = request.name();
        self.dispatch(request)
            .unwrap_or_else(|error| Response::Error { request: name, error })
    }

    fn dispatch(&mut self, request: Request) -> Result<Response, PipelineError> {
        match request {
            Request::Init => {
                if self.session.is_ready() {
                    return Ok(Response::Ready);
                }
                let factory = self
                    .factory
                    .take()
                    .ok_or_else(|| anyhow::anyhow!("engine factory already failed once"))?;
                self.session.install(factory()?);
                info!("Inference engine ready");
                Ok(Response::Ready)
            }
            Request::Detect { file_id, image } => {
                let predictions = self.session.detect(&image, &self.settings.postprocess)?;
                Ok(Response::Detect {
                    file_id,
                    predictions,
                })
            }
            Request::Compose {
                profile_key,
                payload,
            } => {
                let profile = self
                    .settings
                    .profiles
                    .get(&profile_key)
                    .ok_or_else(|| anyhow::anyhow!("unknown profile '{profile_key}'"))?;
                let composition = self
                    .exporter
                    .compositor()
                    .compose(&payload, profile, &profile_key)?;
                let errors = composition
                    .failures
                    .iter()
                    .map(|failure| format!("{profile_key}/{failure}"))
                    .collect();
                Ok(Response::Compose {
                    profile_key,
                    images: composition.images,
                    document: composition.document,
                    errors,
                })
            }
            Request::ComposeMany {
                profile_key,
                items,
                canvas,
                pattern,
            } => {
                let compositor = self.exporter.compositor();
                let output = compositor.compose_layout(&items, canvas, &pattern, &profile_key)?;
                let document = build_layout(output.job, canvas.0, canvas.1, output.background);
                let bytes = compositor.serializer().serialize(&document)?;
                Ok(Response::ComposeMany {
                    outputs: vec![ComposedImage {
                        name: profile_key.clone(),
                        width: canvas.0,
                        height: canvas.1,
                        image: DynamicImage::ImageRgba8(output.flattened),
                    }],
                    profile_key,
                    document: Some(bytes),
                })
            }
            Request::Export {
                payload,
                profiles,
                mut destination,
            } => Ok(Response::Export(self.exporter.export_all_profiles(
                &payload,
                &profiles,
                destination.as_mut(),
            ))),
        }
    }
}
