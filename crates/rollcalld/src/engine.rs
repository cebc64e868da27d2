use crate::config::Config;
use crate::pipeline::{AttendancePipeline, PipelineError};
use rollcall_core::{EmbeddingOracle, FaceEmbedder, ScrfdDetector};
use rollcall_store::{AttendanceDb, AttendanceRow, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] rollcall_core::detector::DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] rollcall_core::embedder::EmbedderError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Scan {
        image_bytes: Vec<u8>,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    Attendance {
        reply: oneshot::Sender<Result<Vec<AttendanceRow>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run one scan through the attendance pipeline and return the
    /// human-readable outcome message. Scans queue behind each other;
    /// there is no timeout around the verification sweep, so a caller
    /// needing bounded latency must impose its own.
    pub async fn scan(&self, image_bytes: Vec<u8>) -> Result<String, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Scan { image_bytes, reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Read the full attendance ledger, newest date first.
    pub async fn attendance(&self) -> Result<Vec<AttendanceRow>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Attendance { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Handle whose engine thread is gone; every request fails with
    /// `ChannelClosed`. For HTTP-layer tests that never reach the engine.
    #[cfg(test)]
    pub(crate) fn disconnected() -> Self {
        let (tx, _) = mpsc::channel(1);
        Self { tx }
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Opens the database and loads both ONNX models up front (fail-fast),
/// then enters a request loop. The heavy model sessions live for the
/// whole process; nothing is reinitialized per request.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let db = AttendanceDb::open(&config.db_path)?;
    tracing::info!(path = %config.db_path.display(), "attendance database opened");

    let scrfd_path = config.scrfd_model_path();
    let probe_detector = ScrfdDetector::load(&scrfd_path)?;
    // The oracle keeps its own detection session for reference images.
    let reference_detector = ScrfdDetector::load(&scrfd_path)?;
    tracing::info!(path = scrfd_path, "SCRFD detector loaded");

    let embedder = FaceEmbedder::load(&config.arcface_model_path())?;
    tracing::info!(path = config.arcface_model_path(), "ArcFace embedder loaded");

    let oracle = EmbeddingOracle::with_threshold(
        Box::new(reference_detector),
        embedder,
        config.distance_threshold,
    );
    let mut pipeline = AttendancePipeline::new(Box::new(probe_detector), Box::new(oracle));

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Scan { image_bytes, reply } => {
                        let result = pipeline
                            .scan(&db, &image_bytes)
                            .map(|outcome| outcome.message())
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Attendance { reply } => {
                        let result = db.attendance().map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .expect("failed to spawn engine thread");

    Ok(EngineHandle { tx })
}
