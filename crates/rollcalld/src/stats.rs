use crate::model_store::ModelArtifacts;
use crate::sample_store::SampleStore;
use serde::Serialize;

const NEVER_TRAINED: &str = "Never";

/// Read-only dataset and model summary, recomputed on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub total_people: usize,
    pub total_images: usize,
    pub last_trained: String,
}

pub fn collect(store: &SampleStore, artifacts: &ModelArtifacts) -> StatsSummary {
    let (total_people, total_images) = match store.groups() {
        Ok(groups) => {
            let images = groups
                .iter()
                .map(|group| {
                    group.image_count().unwrap_or_else(|e| {
                        tracing::warn!(error = %e, label = %group.label, "cannot count samples");
                        0
                    })
                })
                .sum();
            (groups.len(), images)
        }
        Err(e) => {
            tracing::debug!(error = %e, "sample store unreadable, reporting empty stats");
            (0, 0)
        }
    };

    let last_trained = artifacts
        .last_trained()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| NEVER_TRAINED.to_string());

    StatsSummary {
        total_people,
        total_images,
        last_trained,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_empty_install() {
        let dir = tempfile::tempdir().unwrap();
        let stats = collect(
            &SampleStore::new(dir.path().join("dataset")),
            &ModelArtifacts::new(dir.path().join("model.json"), dir.path().join("labels.json")),
        );
        assert_eq!(
            stats,
            StatsSummary {
                total_people: 0,
                total_images: 0,
                last_trained: "Never".into()
            }
        );
    }

    #[test]
    fn test_counts_people_and_image_files() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("dataset");
        for (person, files) in [
            ("alice", vec!["a.png", "b.jpg", "notes.txt"]),
            ("bob", vec!["c.JPEG"]),
            ("carol", vec![]),
        ] {
            fs::create_dir_all(root.join(person)).unwrap();
            for file in files {
                fs::write(root.join(person).join(file), "x").unwrap();
            }
        }
        fs::write(root.join("stray.png"), "x").unwrap();

        let stats = collect(
            &SampleStore::new(&root),
            &ModelArtifacts::new(dir.path().join("model.json"), dir.path().join("labels.json")),
        );
        assert_eq!(stats.total_people, 3);
        assert_eq!(stats.total_images, 3);
    }

    #[test]
    fn test_last_trained_uses_model_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("model.json");
        fs::write(&model, "{}").unwrap();

        let stats = collect(
            &SampleStore::new(dir.path().join("dataset")),
            &ModelArtifacts::new(&model, dir.path().join("labels.json")),
        );
        assert_ne!(stats.last_trained, "Never");
        assert!(chrono::NaiveDateTime::parse_from_str(&stats.last_trained, "%Y-%m-%d %H:%M:%S").is_ok());
    }
}
