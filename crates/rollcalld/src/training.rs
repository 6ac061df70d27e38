//! Training pipeline: sample store → classifier → persisted artifacts.

use crate::model_store::{ActiveModel, ModelArtifacts, ModelStoreError};
use crate::sample_store::{SampleGroup, SampleStore, StoreError};
use rollcall_core::{ClassifierError, FaceClassifier, LabeledFace};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Dataset directory not found.")]
    DatasetMissing(PathBuf),
    #[error("No training data found.")]
    EmptyDataset,
    #[error("Training failed: {0}")]
    Engine(#[from] ClassifierError),
    #[error("Training failed: {0}")]
    Store(#[from] StoreError),
    #[error("Training failed: {0}")]
    Artifacts(#[from] ModelStoreError),
}

/// Summary of a successful training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingReport {
    /// Images the classifier was trained on.
    pub samples: usize,
    /// Person groups in the label map.
    pub people: usize,
    /// Entries that could not be decoded as images.
    pub skipped: usize,
}

impl fmt::Display for TrainingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Training complete. Trained on {} images for {} people.",
            self.samples, self.people
        )
    }
}

#[derive(Debug)]
pub struct TrainingOutcome {
    pub report: TrainingReport,
    pub model: ActiveModel,
}

/// Train on every sample currently in `store` and persist the result.
///
/// Indices are handed out 0, 1, 2, ... in directory enumeration order, so
/// the same label may get a different index on the next run. Nothing is
/// written unless the classifier succeeds; on error the previous artifacts
/// stay in place.
pub fn train(
    store: &SampleStore,
    classifier: &dyn FaceClassifier,
    artifacts: &ModelArtifacts,
) -> Result<TrainingOutcome, TrainingError> {
    if !store.exists() {
        return Err(TrainingError::DatasetMissing(store.root().to_path_buf()));
    }

    let mut labels = BTreeMap::new();
    let mut samples = Vec::new();
    let mut skipped = 0;

    for (index, group) in (0i32..).zip(store.groups()?) {
        skipped += collect_group(&group, index, &mut samples)?;
        labels.insert(index, group.label);
    }

    if samples.is_empty() {
        tracing::warn!(groups = labels.len(), skipped, "no usable training samples");
        return Err(TrainingError::EmptyDataset);
    }

    let report = TrainingReport {
        samples: samples.len(),
        people: labels.len(),
        skipped,
    };
    tracing::info!(
        samples = report.samples,
        people = report.people,
        skipped = report.skipped,
        "training classifier"
    );

    let model = classifier.train(&samples)?;
    let map = artifacts.persist(model.as_ref(), labels)?;
    let model = ActiveModel::new(model, map)?;

    Ok(TrainingOutcome { report, model })
}

/// Decode every entry of `group` under `index`; returns how many were skipped.
fn collect_group(
    group: &SampleGroup,
    index: i32,
    samples: &mut Vec<LabeledFace>,
) -> Result<usize, StoreError> {
    let mut skipped = 0;
    for path in group.entries()? {
        match image::open(&path) {
            Ok(image) => samples.push(LabeledFace {
                image: image.to_luma8(),
                index,
            }),
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "skipping unreadable sample");
                skipped += 1;
            }
        }
    }
    Ok(skipped)
}
