use gatewatch_core::gallery::GalleryError;
use gatewatch_core::{Embedder, FaceCandidate, PresenceDetector, RecognitionAdapter, RecognitionOutcome};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Requests queued ahead of the one being processed.
const ENGINE_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("engine init failed: {0}")]
    Init(String),
    #[error("recognition engine: {0}")]
    Recognition(#[from] gatewatch_core::EngineError),
    #[error("gallery: {0}")]
    Gallery(#[from] GalleryError),
    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    DetectPresence {
        image: Arc<DynamicImage>,
        reply: oneshot::Sender<Vec<FaceCandidate>>,
    },
    MatchIdentity {
        image: Arc<DynamicImage>,
        reply: oneshot::Sender<RecognitionOutcome>,
    },
    Register {
        name: String,
        image: Arc<DynamicImage>,
        reply: oneshot::Sender<Result<PathBuf, GalleryError>>,
    },
    SubjectCount {
        reply: oneshot::Sender<Result<usize, GalleryError>>,
    },
}

/// Clone-safe handle to the engine thread.
///
/// Every call is bounded by the handle's timeout. A timed-out request keeps
/// running on the engine thread; its reply is discarded.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    timeout: Duration,
}

impl EngineHandle {
    /// Face candidates above the presence floor.
    pub async fn detect_presence(&self, image: Arc<DynamicImage>) -> Result<Vec<FaceCandidate>, EngineError> {
        self.call(|reply| EngineRequest::DetectPresence { image, reply }).await
    }

    /// Best gallery match, already collapsed to Known / Unknown / no face.
    pub async fn match_identity(&self, image: Arc<DynamicImage>) -> Result<RecognitionOutcome, EngineError> {
        self.call(|reply| EngineRequest::MatchIdentity { image, reply }).await
    }

    /// Store a reference image for `name`; returns the written path.
    pub async fn register(&self, name: String, image: Arc<DynamicImage>) -> Result<PathBuf, EngineError> {
        let path = self
            .call(|reply| EngineRequest::Register { name, image, reply })
            .await??;
        Ok(path)
    }

    pub async fn subject_count(&self) -> Result<usize, EngineError> {
        let count = self.call(|reply| EngineRequest::SubjectCount { reply }).await??;
        Ok(count)
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            self.tx
                .send(request(reply_tx))
                .await
                .map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)
        };
        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| EngineError::Timeout(self.timeout))?
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `init` runs on that thread, so blocking clients and model handles are
/// created and dropped off the async runtime. Fails fast if `init` fails.
pub async fn spawn_engine<D, E, F>(init: F, timeout: Duration) -> Result<EngineHandle, EngineError>
where
    D: PresenceDetector + 'static,
    E: Embedder + 'static,
    F: FnOnce() -> Result<RecognitionAdapter<D, E>, EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(ENGINE_QUEUE_DEPTH);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), EngineError>>();

    std::thread::Builder::new()
        .name("gatewatch-engine".into())
        .spawn(move || {
            let mut adapter = match init() {
                Ok(adapter) => {
                    let _ = ready_tx.send(Ok(()));
                    adapter
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            tracing::info!(
                presence_floor = adapter.presence_floor(),
                match_threshold = adapter.match_threshold(),
                "engine thread started"
            );

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::DetectPresence { image, reply } => {
                        let _ = reply.send(adapter.detect_presence(&image));
                    }
                    EngineRequest::MatchIdentity { image, reply } => {
                        let _ = reply.send(adapter.match_identity(&image));
                    }
                    EngineRequest::Register { name, image, reply } => {
                        let _ = reply.send(adapter.register(&name, &image));
                    }
                    EngineRequest::SubjectCount { reply } => {
                        let _ = reply.send(adapter.subject_count());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(|e| EngineError::Init(format!("cannot spawn engine thread: {e}")))?;

    ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx, timeout })
}
