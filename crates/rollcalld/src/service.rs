//! Request handlers: one synchronous method per externally visible operation.
//!
//! Every method converts its own failures into a typed result; nothing here
//! panics on bad input or I/O.

use crate::ledger::{AttendanceRecordView, Ledger, LedgerError, LogOutcome};
use crate::model_store::{ActiveModel, ModelArtifacts, ModelSlot, UNKNOWN_LABEL};
use crate::recognition::{self, Decision, RankedCandidate, RecognitionPolicy};
use crate::sample_store::{SampleStore, StoreError};
use crate::stats::{self, StatsSummary};
use crate::training::{self, TrainingError, TrainingReport};
use chrono::NaiveDate;
use rollcall_core::{
    crop_face, decode_payload, DetectorError, FaceClassifier, FaceDetector, FrameError,
    InputError, PersonLabel,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Input(#[from] InputError),
    #[error("invalid image: {0}")]
    Frame(#[from] FrameError),
    #[error("face detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("storage error: {0}")]
    Ledger(#[from] LedgerError),
}

impl ServiceError {
    /// Caller-side mistakes, as opposed to service failures.
    pub fn is_input(&self) -> bool {
        matches!(self, Self::Input(_) | Self::Frame(_))
    }
}

/// Recognition decision plus the attendance side effect of a match.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizeOutcome {
    pub decision: Decision,
    pub attendance: Option<LogOutcome>,
}

/// Wire form of [`RecognizeOutcome`].
#[derive(Debug, Serialize)]
pub struct RecognizeResponse<'a> {
    pub success: bool,
    pub decision: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "<[_]>::is_empty")]
    pub details: &'a [RankedCandidate],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attendance: Option<LogOutcome>,
    pub message: String,
}

impl RecognizeOutcome {
    pub fn response(&self) -> RecognizeResponse<'_> {
        let (decision, name, confidence, details) =
            match &self.decision {
                Decision::NoModelLoaded => ("no_model_loaded", None, None, &[][..]),
                Decision::NoFaceDetected => ("no_face_detected", None, None, &[][..]),
                Decision::Matched {
                    label,
                    distance,
                    ranked,
                } => (
                    "matched",
                    Some(label.as_str()),
                    Some(*distance),
                    ranked.as_slice(),
                ),
                // Infinite distance (nothing ranked) has no JSON form.
                Decision::Rejected { distance, ranked } => (
                    "rejected",
                    None,
                    Some(*distance).filter(|d| d.is_finite()),
                    ranked.as_slice(),
                ),
            };

        let message = match (&self.decision, self.attendance) {
            (Decision::Matched { label, .. }, Some(LogOutcome::AlreadyLogged)) => {
                format!("Welcome back, {label}! (Already logged)")
            }
            (Decision::Matched { label, .. }, _) => format!("Welcome, {label}!"),
            (Decision::Rejected { ranked, .. }, _)
                if ranked.first().is_some_and(|c| c.name != UNKNOWN_LABEL) =>
            {
                "Face not recognized (Low confidence).".to_string()
            }
            (Decision::Rejected { .. }, _) => "Face not recognized.".to_string(),
            (Decision::NoFaceDetected, _) => "No face detected.".to_string(),
            (Decision::NoModelLoaded, _) => "No trained model available.".to_string(),
        };

        RecognizeResponse {
            success: matches!(self.decision, Decision::Matched { .. }),
            decision,
            name,
            confidence,
            details,
            attendance: self.attendance,
            message,
        }
    }
}

pub struct AttendanceService {
    detector: Box<dyn FaceDetector>,
    classifier: Arc<dyn FaceClassifier>,
    samples: SampleStore,
    artifacts: ModelArtifacts,
    slot: ModelSlot,
    ledger: Ledger,
    policy: RecognitionPolicy,
}

impl AttendanceService {
    pub fn new(
        detector: Box<dyn FaceDetector>,
        classifier: Arc<dyn FaceClassifier>,
        samples: SampleStore,
        artifacts: ModelArtifacts,
        ledger: Ledger,
        policy: RecognitionPolicy,
    ) -> Self {
        Self {
            detector,
            classifier,
            samples,
            artifacts,
            slot: ModelSlot::default(),
            ledger,
            policy,
        }
    }

    /// Current model snapshot, loading persisted artifacts if none is active.
    pub fn active_model(&self) -> Option<Arc<ActiveModel>> {
        if let Some(model) = self.slot.current() {
            return Some(model);
        }
        match self.artifacts.load(self.classifier.as_ref()) {
            Ok(Some(model)) => {
                tracing::info!(labels = model.labels.len(), "active model loaded from disk");
                Some(self.slot.replace(model))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "persisted model could not be loaded");
                None
            }
        }
    }

    /// Enroll one frame for `label`. `Ok(false)` when no face was found.
    pub fn register(&mut self, label: &str, payload: &[u8]) -> Result<bool, ServiceError> {
        let label = PersonLabel::new(label)?;
        if payload.is_empty() {
            return Err(InputError::EmptyImage.into());
        }
        let frame = decode_payload(payload)?;

        let faces = self.detector.detect(&frame)?;
        let Some(face) = faces.first().and_then(|region| crop_face(&frame, region)) else {
            tracing::info!(label = %label, "register: no face detected");
            return Ok(false);
        };

        let path = self.samples.save(&label, &face)?;
        tracing::info!(label = %label, path = %path.display(), "register: sample stored");
        Ok(true)
    }

    /// Retrain from the whole sample store and activate the new model.
    ///
    /// On failure the previously active model stays in effect.
    pub fn train(&mut self) -> Result<TrainingReport, TrainingError> {
        let outcome = training::train(&self.samples, self.classifier.as_ref(), &self.artifacts)
            .map_err(|e| {
                tracing::warn!(error = %e, "training did not produce a model");
                e
            })?;
        self.slot.replace(outcome.model);
        tracing::info!(report = %outcome.report, "new model active");
        Ok(outcome.report)
    }

    /// Classify one frame; a match is recorded in today's ledger.
    pub fn recognize(&mut self, payload: &[u8]) -> Result<RecognizeOutcome, ServiceError> {
        if payload.is_empty() {
            return Err(InputError::EmptyImage.into());
        }
        let frame = decode_payload(payload)?;
        let model = self.active_model();

        let decision = recognition::recognize(
            &frame,
            self.detector.as_mut(),
            model.as_deref(),
            &self.policy,
        )?;

        let attendance = match &decision {
            Decision::Matched {
                label,
                distance,
                ranked,
            } => Some(self.ledger.log_if_absent(label, *distance, ranked)?),
            _ => None,
        };

        Ok(RecognizeOutcome {
            decision,
            attendance,
        })
    }

    pub fn log_attendance(
        &self,
        label: &str,
        confidence: f64,
        details: &[RankedCandidate],
    ) -> Result<LogOutcome, ServiceError> {
        let label = PersonLabel::new(label)?;
        Ok(self.ledger.log_if_absent(&label, confidence, details)?)
    }

    pub fn logs(&self, date: Option<NaiveDate>) -> Result<Vec<AttendanceRecordView>, ServiceError> {
        Ok(self.ledger.logs(date)?)
    }

    pub fn stats(&self) -> StatsSummary {
        stats::collect(&self.samples, &self.artifacts)
    }

    pub fn status(&self) -> serde_json::Value {
        let model = self.slot.current();
        serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "model_loaded": model.is_some(),
            "labels": model.as_ref().map_or(0, |m| m.labels.len()),
            "match_threshold": self.policy.threshold,
            "dataset": self.samples.root().display().to_string(),
            "model_path": self.artifacts.model_path().display().to_string(),
        })
    }
}
