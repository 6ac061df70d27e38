use crate::ledger::{AttendanceRecordView, LogOutcome};
use crate::recognition::RankedCandidate;
use crate::service::{AttendanceService, RecognizeOutcome, ServiceError};
use crate::stats::StatsSummary;
use crate::training::{TrainingError, TrainingReport};
use chrono::NaiveDate;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Register {
        label: String,
        image: Vec<u8>,
        reply: oneshot::Sender<Result<bool, ServiceError>>,
    },
    Train {
        reply: oneshot::Sender<Result<TrainingReport, TrainingError>>,
    },
    Recognize {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<RecognizeOutcome, ServiceError>>,
    },
    LogAttendance {
        label: String,
        confidence: f64,
        details: Vec<RankedCandidate>,
        reply: oneshot::Sender<Result<LogOutcome, ServiceError>>,
    },
    Logs {
        date: Option<NaiveDate>,
        reply: oneshot::Sender<Result<Vec<AttendanceRecordView>, ServiceError>>,
    },
    Stats {
        reply: oneshot::Sender<StatsSummary>,
    },
    Status {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Detect a face in `image` and store it as a sample for `label`.
    pub async fn register(&self, label: String, image: Vec<u8>) -> Result<bool, EngineError> {
        Ok(self
            .call(|reply| EngineRequest::Register {
                label,
                image,
                reply,
            })
            .await??)
    }

    /// Retrain on the full sample store. The inner error is a report, not a
    /// daemon fault.
    pub async fn train(&self) -> Result<Result<TrainingReport, TrainingError>, EngineError> {
        self.call(|reply| EngineRequest::Train { reply }).await
    }

    pub async fn recognize(&self, image: Vec<u8>) -> Result<RecognizeOutcome, EngineError> {
        Ok(self
            .call(|reply| EngineRequest::Recognize { image, reply })
            .await??)
    }

    pub async fn log_attendance(
        &self,
        label: String,
        confidence: f64,
        details: Vec<RankedCandidate>,
    ) -> Result<LogOutcome, EngineError> {
        Ok(self
            .call(|reply| EngineRequest::LogAttendance {
                label,
                confidence,
                details,
                reply,
            })
            .await??)
    }

    pub async fn logs(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecordView>, EngineError> {
        Ok(self.call(|reply| EngineRequest::Logs { date, reply }).await??)
    }

    pub async fn stats(&self) -> Result<StatsSummary, EngineError> {
        self.call(|reply| EngineRequest::Stats { reply }).await
    }

    pub async fn status(&self) -> Result<serde_json::Value, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the service (and with it the detector session) and
/// handles one request at a time, so enrollment, training and recognition
/// never interleave.
pub fn spawn_engine(mut service: AttendanceService) -> Result<EngineHandle, EngineError> {
    // Pick up a model trained by a previous run before the first request.
    if service.active_model().is_none() {
        tracing::info!("no trained model yet; recognition disabled until Train");
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                handle(&mut service, req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

fn handle(service: &mut AttendanceService, req: EngineRequest) {
    // A dropped receiver means the D-Bus caller went away; nothing to do.
    match req {
        EngineRequest::Register {
            label,
            image,
            reply,
        } => {
            let _ = reply.send(service.register(&label, &image));
        }
        EngineRequest::Train { reply } => {
            let _ = reply.send(service.train());
        }
        EngineRequest::Recognize { image, reply } => {
            let _ = reply.send(service.recognize(&image));
        }
        EngineRequest::LogAttendance {
            label,
            confidence,
            details,
            reply,
        } => {
            let _ = reply.send(service.log_attendance(&label, confidence, &details));
        }
        EngineRequest::Logs { date, reply } => {
            let _ = reply.send(service.logs(date));
        }
        EngineRequest::Stats { reply } => {
            let _ = reply.send(service.stats());
        }
        EngineRequest::Status { reply } => {
            let _ = reply.send(service.status());
        }
    }
}
