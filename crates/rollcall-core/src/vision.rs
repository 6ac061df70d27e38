//! Capability seams for the vision engine.
//!
//! The attendance pipeline only talks to these traits; `ScrfdDetector` and
//! `LbphClassifier` are the shipped implementations.

use crate::detector::DetectorError;
use crate::types::{BoundingBox, Candidate};
use image::GrayImage;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("no training samples supplied")]
    EmptyTrainingSet,
    #[error("sample {0} has zero area")]
    DegenerateSample(usize),
    #[error("invalid classifier parameters: {0}")]
    InvalidParams(String),
    #[error("model artifact is corrupt: {0}")]
    CorruptModel(String),
    #[error("model serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Locates face regions in a grayscale frame.
pub trait FaceDetector: Send {
    /// Returns face boxes ordered by descending detector confidence.
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// A face crop paired with the dense label index it was trained under.
pub struct LabeledFace {
    pub image: GrayImage,
    pub index: i32,
}

/// Builds classifier models from labeled samples and restores persisted ones.
pub trait FaceClassifier: Send + Sync {
    fn train(&self, samples: &[LabeledFace]) -> Result<Arc<dyn TrainedModel>, ClassifierError>;

    fn load(&self, bytes: &[u8]) -> Result<Arc<dyn TrainedModel>, ClassifierError>;
}

/// A trained, read-only classifier. Safe to share across threads.
pub trait TrainedModel: Send + Sync {
    /// Rank every trained index by distance to `face`, ascending.
    fn rank(&self, face: &GrayImage) -> Vec<Candidate>;

    /// Distinct label indices present in the model, ascending.
    fn indices(&self) -> Vec<i32>;

    /// Engine-specific serialized form.
    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError>;
}
