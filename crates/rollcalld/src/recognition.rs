//! Recognition decision engine.
//!
//! Detection, ranking and the accept/reject policy are separate steps so the
//! threshold can be tuned without touching the classifier call.

use crate::model_store::{ActiveModel, LabelMap, UNKNOWN_LABEL};
use image::GrayImage;
use rollcall_core::{crop_face, Candidate, DetectorError, FaceDetector, PersonLabel};
use serde::{Deserialize, Serialize};

/// One ranked label as surfaced to callers and stored in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub name: String,
    pub distance: f64,
}

/// Outcome of one recognition call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    NoModelLoaded,
    NoFaceDetected,
    Matched {
        label: PersonLabel,
        distance: f64,
        ranked: Vec<RankedCandidate>,
    },
    /// The best candidate was too far away or has no label. The nominal best
    /// label is deliberately not surfaced.
    Rejected {
        distance: f64,
        ranked: Vec<RankedCandidate>,
    },
}

/// Distance threshold separating acceptance from rejection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionPolicy {
    /// Accept iff the best distance is strictly below this value.
    pub threshold: f64,
}

impl RecognitionPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Apply the threshold to a classifier ranking (ascending distance).
    pub fn decide(&self, ranking: &[Candidate], labels: &LabelMap) -> Decision {
        let ranked: Vec<RankedCandidate> = ranking
            .iter()
            .map(|c| RankedCandidate {
                name: labels
                    .resolve(c.index)
                    .map_or(UNKNOWN_LABEL, PersonLabel::as_str)
                    .to_string(),
                distance: c.distance,
            })
            .collect();

        let Some(best) = ranking.first() else {
            return Decision::Rejected {
                distance: f64::INFINITY,
                ranked,
            };
        };

        match labels.resolve(best.index) {
            Some(label) if best.distance < self.threshold => Decision::Matched {
                label: label.clone(),
                distance: best.distance,
                ranked,
            },
            _ => Decision::Rejected {
                distance: best.distance,
                ranked,
            },
        }
    }
}

/// Classify the first face found in `frame` against `model`.
///
/// Only the detector's first region is considered; further faces in the
/// frame are ignored.
pub fn recognize(
    frame: &GrayImage,
    detector: &mut dyn FaceDetector,
    model: Option<&ActiveModel>,
    policy: &RecognitionPolicy,
) -> Result<Decision, DetectorError> {
    let Some(model) = model else {
        return Ok(Decision::NoModelLoaded);
    };

    let faces = detector.detect(frame)?;
    let Some(face) = faces.first().and_then(|region| crop_face(frame, region)) else {
        tracing::debug!(regions = faces.len(), "recognize: no usable face region");
        return Ok(Decision::NoFaceDetected);
    };

    let ranking = model.model.rank(&face);
    let decision = policy.decide(&ranking, &model.labels);

    match &decision {
        Decision::Matched { label, distance, .. } => {
            tracing::info!(label = %label, distance, "recognize: matched");
        }
        Decision::Rejected { distance, .. } => {
            tracing::info!(distance, threshold = policy.threshold, "recognize: rejected");
        }
        _ => {}
    }
    Ok(decision)
}
