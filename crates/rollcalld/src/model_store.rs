//! Trained model artifacts and the process-wide active model.
//!
//! A training run produces two files: the engine's opaque model bytes and a
//! JSON label map. The map records the SHA-256 of the model bytes, so a map
//! can only ever be loaded next to the model it was written for.

use chrono::{DateTime, Local};
use rollcall_core::{ClassifierError, FaceClassifier, PersonLabel, TrainedModel};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Name reported for an index that has no entry in the label map.
pub const UNKNOWN_LABEL: &str = "Unknown";

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("model artifact I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("label map {path} is invalid: {source}")]
    LabelMap {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("label map does not belong to model file (digest mismatch)")]
    DigestMismatch,
    #[error("model uses index {0} which has no label")]
    UnmappedIndex(i32),
    #[error("classifier: {0}")]
    Classifier(#[from] ClassifierError),
}

impl ModelStoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Index → label mapping produced by one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelMap {
    pub model_digest: String,
    pub trained_at: DateTime<Local>,
    pub labels: BTreeMap<i32, PersonLabel>,
}

impl LabelMap {
    pub fn resolve(&self, index: i32) -> Option<&PersonLabel> {
        self.labels.get(&index)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }
}

/// A loaded classifier together with the mapping it was trained with.
pub struct ActiveModel {
    pub model: Arc<dyn TrainedModel>,
    pub labels: LabelMap,
}

impl std::fmt::Debug for ActiveModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveModel")
            .field("labels", &self.labels)
            .finish_non_exhaustive()
    }
}

impl ActiveModel {
    /// Pair a model with its mapping, checking every model index is mapped.
    pub fn new(model: Arc<dyn TrainedModel>, labels: LabelMap) -> Result<Self, ModelStoreError> {
        if let Some(index) = model
            .indices()
            .into_iter()
            .find(|i| !labels.labels.contains_key(i))
        {
            return Err(ModelStoreError::UnmappedIndex(index));
        }
        Ok(Self { model, labels })
    }
}

fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Locations of the persisted model and label map.
#[derive(Debug, Clone)]
pub struct ModelArtifacts {
    model_path: PathBuf,
    labels_path: PathBuf,
}

impl ModelArtifacts {
    pub fn new(model_path: impl Into<PathBuf>, labels_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            labels_path: labels_path.into(),
        }
    }

    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Serialize `model` and write both artifacts, replacing any previous pair.
    ///
    /// Both files are staged as temporary siblings before either is renamed
    /// into place. If the swap fails midway the previous model file is put
    /// back, so the files on disk are always the old pair or the new pair.
    pub fn persist(
        &self,
        model: &dyn TrainedModel,
        labels: BTreeMap<i32, PersonLabel>,
    ) -> Result<LabelMap, ModelStoreError> {
        let bytes = model.to_bytes()?;
        let map = LabelMap {
            model_digest: digest_hex(&bytes),
            trained_at: Local::now(),
            labels,
        };
        let map_bytes = serde_json::to_vec_pretty(&map).map_err(|source| {
            ModelStoreError::LabelMap {
                path: self.labels_path.clone(),
                source,
            }
        })?;

        let model_tmp = sibling(&self.model_path, "tmp");
        let labels_tmp = sibling(&self.labels_path, "tmp");
        let staged =
            write_file(&model_tmp, &bytes).and_then(|()| write_file(&labels_tmp, &map_bytes));
        if let Err(e) = staged {
            discard(&model_tmp);
            discard(&labels_tmp);
            return Err(e);
        }
        self.swap_in(&model_tmp, &labels_tmp)?;

        tracing::info!(
            model = %self.model_path.display(),
            labels = map.len(),
            digest = %map.model_digest,
            "model artifacts persisted"
        );
        Ok(map)
    }

    fn swap_in(&self, model_tmp: &Path, labels_tmp: &Path) -> Result<(), ModelStoreError> {
        let backup = sibling(&self.model_path, "prev");
        let had_previous = match std::fs::rename(&self.model_path, &backup) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                discard(model_tmp);
                discard(labels_tmp);
                return Err(ModelStoreError::io(&self.model_path, e));
            }
        };
        let restore_previous = || {
            let restored = if had_previous {
                std::fs::rename(&backup, &self.model_path)
            } else {
                std::fs::remove_file(&self.model_path)
            };
            if let Err(e) = restored {
                tracing::error!(error = %e, path = %self.model_path.display(), "failed to restore previous model");
            }
        };

        if let Err(e) = std::fs::rename(model_tmp, &self.model_path) {
            restore_previous();
            discard(model_tmp);
            discard(labels_tmp);
            return Err(ModelStoreError::io(&self.model_path, e));
        }
        if let Err(e) = std::fs::rename(labels_tmp, &self.labels_path) {
            restore_previous();
            discard(labels_tmp);
            return Err(ModelStoreError::io(&self.labels_path, e));
        }
        if had_previous {
            discard(&backup);
        }
        Ok(())
    }

    /// Load the persisted pair. `Ok(None)` when either file is absent.
    pub fn load(
        &self,
        classifier: &dyn FaceClassifier,
    ) -> Result<Option<ActiveModel>, ModelStoreError> {
        let Some(bytes) = read_optional(&self.model_path)? else {
            return Ok(None);
        };
        let Some(map_bytes) = read_optional(&self.labels_path)? else {
            return Ok(None);
        };

        let labels: LabelMap =
            serde_json::from_slice(&map_bytes).map_err(|source| ModelStoreError::LabelMap {
                path: self.labels_path.clone(),
                source,
            })?;
        if labels.model_digest != digest_hex(&bytes) {
            return Err(ModelStoreError::DigestMismatch);
        }

        let model = classifier.load(&bytes)?;
        ActiveModel::new(model, labels).map(Some)
    }

    /// Modification time of the model file, if one exists.
    pub fn last_trained(&self) -> Option<DateTime<Local>> {
        let modified = std::fs::metadata(&self.model_path)
            .and_then(|m| m.modified())
            .ok()?;
        Some(DateTime::<Local>::from(modified))
    }
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, ModelStoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ModelStoreError::io(path, e)),
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ModelStoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ModelStoreError::io(parent, e))?;
    }
    std::fs::write(path, bytes).map_err(|e| ModelStoreError::io(path, e))
}

/// Best-effort removal of a staging file.
fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(error = %e, path = %path.display(), "cannot remove staging file"),
    }
}

/// Holder of the process-wide active model.
///
/// Lifecycle: empty until the first successful load or training run, then
/// replaced wholesale on every retrain. Readers receive an `Arc` snapshot
/// and never observe a partially built model.
#[derive(Default)]
pub struct ModelSlot {
    current: RwLock<Option<Arc<ActiveModel>>>,
}

impl ModelSlot {
    pub fn current(&self) -> Option<Arc<ActiveModel>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, model: ActiveModel) -> Arc<ActiveModel> {
        let model = Arc::new(model);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Arc::clone(&model));
        model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use rollcall_core::{LabeledFace, LbphClassifier};

    fn trained(indices: &[i32]) -> Arc<dyn TrainedModel> {
        let samples: Vec<LabeledFace> = indices
            .iter()
            .map(|&index| LabeledFace {
                image: GrayImage::from_fn(32, 32, |x, y| Luma([((x * (index as u32 + 2)) ^ y) as u8])),
                index,
            })
            .collect();
        LbphClassifier::default().train(&samples).unwrap()
    }

    fn labels(pairs: &[(i32, &str)]) -> BTreeMap<i32, PersonLabel> {
        pairs
            .iter()
            .map(|(i, l)| (*i, PersonLabel::new(l).unwrap()))
            .collect()
    }

    fn name(map: &LabelMap, index: i32) -> Option<&str> {
        map.resolve(index).map(PersonLabel::as_str)
    }

    fn artifacts(dir: &Path) -> ModelArtifacts {
        ModelArtifacts::new(dir.join("model.json"), dir.join("labels.json"))
    }

    #[test]
    fn test_persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        let model = trained(&[0, 1]);

        let map = store
            .persist(model.as_ref(), labels(&[(0, "alice"), (1, "bob")]))
            .unwrap();
        let loaded = store.load(&LbphClassifier::default()).unwrap().unwrap();

        assert_eq!(loaded.labels, map);
        assert_eq!(name(&loaded.labels, 1), Some("bob"));
        assert_eq!(loaded.model.indices(), vec![0, 1]);
        assert!(!dir.path().join("model.json.tmp").exists());
        assert!(!dir.path().join("model.json.prev").exists());
    }

    #[test]
    fn test_failed_label_staging_keeps_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        store
            .persist(trained(&[0]).as_ref(), labels(&[(0, "alice")]))
            .unwrap();
        let model_before = std::fs::read(dir.path().join("model.json")).unwrap();
        let labels_before = std::fs::read(dir.path().join("labels.json")).unwrap();

        // A directory in the staging slot makes the label-map write fail.
        std::fs::create_dir(dir.path().join("labels.json.tmp")).unwrap();
        let err = store
            .persist(trained(&[0, 1]).as_ref(), labels(&[(0, "alice"), (1, "bob")]))
            .unwrap_err();
        assert!(matches!(err, ModelStoreError::Io { .. }));

        assert_eq!(std::fs::read(dir.path().join("model.json")).unwrap(), model_before);
        assert_eq!(std::fs::read(dir.path().join("labels.json")).unwrap(), labels_before);
        assert!(!dir.path().join("model.json.tmp").exists());
        let loaded = store.load(&LbphClassifier::default()).unwrap().unwrap();
        assert_eq!(loaded.labels.len(), 1);
    }

    #[test]
    fn test_failed_label_swap_restores_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        store
            .persist(trained(&[0]).as_ref(), labels(&[(0, "alice")]))
            .unwrap();
        let model_before = std::fs::read(dir.path().join("model.json")).unwrap();

        // Renaming a file over a non-empty directory fails after the model
        // file has already been swapped.
        let labels_path = dir.path().join("labels.json");
        std::fs::remove_file(&labels_path).unwrap();
        std::fs::create_dir(&labels_path).unwrap();
        std::fs::write(labels_path.join("occupied"), "x").unwrap();

        assert!(store
            .persist(trained(&[0, 1]).as_ref(), labels(&[(0, "alice"), (1, "bob")]))
            .is_err());

        assert_eq!(std::fs::read(dir.path().join("model.json")).unwrap(), model_before);
        assert!(!dir.path().join("model.json.prev").exists());
        assert!(!dir.path().join("labels.json.tmp").exists());
    }

    #[test]
    fn test_load_without_artifacts_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        assert!(store.load(&LbphClassifier::default()).unwrap().is_none());
        assert!(store.last_trained().is_none());
    }

    #[test]
    fn test_load_refuses_foreign_label_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        store
            .persist(trained(&[0]).as_ref(), labels(&[(0, "alice")]))
            .unwrap();
        let stale_map = std::fs::read(dir.path().join("labels.json")).unwrap();

        store
            .persist(trained(&[0, 1]).as_ref(), labels(&[(0, "bob"), (1, "alice")]))
            .unwrap();
        std::fs::write(dir.path().join("labels.json"), stale_map).unwrap();

        assert!(matches!(
            store.load(&LbphClassifier::default()),
            Err(ModelStoreError::DigestMismatch)
        ));
    }

    #[test]
    fn test_active_model_requires_every_index_mapped() {
        let map = LabelMap {
            model_digest: String::new(),
            trained_at: Local::now(),
            labels: labels(&[(0, "alice")]),
        };
        assert!(matches!(
            ActiveModel::new(trained(&[0, 3]), map),
            Err(ModelStoreError::UnmappedIndex(3))
        ));
    }

    #[test]
    fn test_last_trained_tracks_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = artifacts(dir.path());
        store
            .persist(trained(&[0]).as_ref(), labels(&[(0, "alice")]))
            .unwrap();
        assert!(store.last_trained().is_some());
    }

    #[test]
    fn test_slot_swaps_snapshots() {
        let slot = ModelSlot::default();
        assert!(slot.current().is_none());

        let map = |person: &str| LabelMap {
            model_digest: String::new(),
            trained_at: Local::now(),
            labels: labels(&[(0, person)]),
        };
        slot.replace(ActiveModel::new(trained(&[0]), map("alice")).unwrap());
        let before = slot.current().unwrap();

        slot.replace(ActiveModel::new(trained(&[0]), map("bob")).unwrap());

        // An earlier snapshot stays intact after the swap.
        assert_eq!(name(&before.labels, 0), Some("alice"));
        assert_eq!(name(&slot.current().unwrap().labels, 0), Some("bob"));
    }
}
