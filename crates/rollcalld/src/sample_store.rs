//! On-disk sample store: `<root>/<label>/img_<timestamp>.png`.

use chrono::Local;
use image::{GrayImage, ImageFormat};
use rollcall_core::PersonLabel;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions counted as samples by the stats aggregator.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Attempts at finding a free file name within the same microsecond.
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sample store I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode sample {path}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("could not allocate a unique sample name in {0}")]
    NameExhausted(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One person's directory of face samples.
#[derive(Debug, Clone)]
pub struct SampleGroup {
    pub label: PersonLabel,
    pub dir: PathBuf,
}

impl SampleGroup {
    /// Non-hidden file entries, in directory order.
    pub fn entries(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                entries.push(entry.path());
            }
        }
        Ok(entries)
    }

    /// Number of entries with an image extension.
    pub fn image_count(&self) -> Result<usize, StoreError> {
        Ok(self
            .entries()?
            .iter()
            .filter(|path| has_image_extension(path))
            .count())
    }
}

pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Face samples grouped by person label.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }

    /// Persist a face crop under `label`, returning the new file's path.
    pub fn save(&self, label: &PersonLabel, face: &GrayImage) -> Result<PathBuf, StoreError> {
        let dir = self.root.join(label.as_str());
        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;

        let stem = format!("img_{}", Local::now().format("%Y%m%d_%H%M%S_%6f"));
        let (path, file) = create_unique(&dir, &stem)?;

        let mut writer = BufWriter::new(file);
        face.write_to(&mut writer, ImageFormat::Png)
            .map_err(|source| StoreError::Encode {
                path: path.clone(),
                source,
            })?;
        writer.flush().map_err(|e| StoreError::io(&path, e))?;

        tracing::debug!(label = %label, path = %path.display(), "sample saved");
        Ok(path)
    }

    /// Person groups (directories) under the root, in directory order.
    ///
    /// Non-directory entries are skipped, as are hidden directories and
    /// names that are not valid labels.
    pub fn groups(&self) -> Result<Vec<SampleGroup>, StoreError> {
        let mut groups = Vec::new();
        for entry in fs::read_dir(&self.root).map_err(|e| StoreError::io(&self.root, e))? {
            let entry = entry.map_err(|e| StoreError::io(&self.root, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            let Some(label) = name.to_str().and_then(|n| PersonLabel::new(n).ok()) else {
                tracing::debug!(entry = ?name, "skipping non-label directory");
                continue;
            };
            if label.as_str() != name.to_string_lossy() {
                continue;
            }
            groups.push(SampleGroup {
                label,
                dir: entry.path(),
            });
        }
        Ok(groups)
    }
}

/// Create `<stem>.png`, or `<stem>-<n>.png` when taken, with create-new
/// semantics so concurrent writers never share a file.
fn create_unique(dir: &Path, stem: &str) -> Result<(PathBuf, fs::File), StoreError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.png")
        } else {
            format!("{stem}-{attempt}.png")
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StoreError::io(&path, e)),
        }
    }
    Err(StoreError::NameExhausted(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn label(name: &str) -> PersonLabel {
        PersonLabel::new(name).unwrap()
    }

    #[test]
    fn test_save_creates_group_and_png() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("dataset"));
        let face = GrayImage::from_pixel(12, 12, Luma([99]));

        let path = store.save(&label("alice"), &face).unwrap();

        assert_eq!(path.parent().unwrap(), dir.path().join("dataset/alice"));
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("img_") && name.ends_with(".png"), "{name}");
        let reloaded = image::open(&path).unwrap().to_luma8();
        assert_eq!(reloaded, face);
    }

    #[test]
    fn test_rapid_saves_never_collide() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path());
        let face = GrayImage::from_pixel(4, 4, Luma([1]));

        let paths: Vec<PathBuf> = (0..20)
            .map(|_| store.save(&label("bob"), &face).unwrap())
            .collect();

        let group = &store.groups().unwrap()[0];
        assert_eq!(group.entries().unwrap().len(), paths.len());
    }

    #[test]
    fn test_create_unique_appends_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = create_unique(dir.path(), "img_x").unwrap();
        let (second, _) = create_unique(dir.path(), "img_x").unwrap();
        assert_eq!(first.file_name().unwrap(), "img_x.png");
        assert_eq!(second.file_name().unwrap(), "img_x-1.png");
    }

    #[test]
    fn test_groups_skip_files_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("alice")).unwrap();
        fs::create_dir(dir.path().join(".trash")).unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        let store = SampleStore::new(dir.path());
        let labels: Vec<PersonLabel> = store.groups().unwrap().into_iter().map(|g| g.label).collect();
        assert_eq!(labels, vec![label("alice")]);
    }

    #[test]
    fn test_groups_on_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::new(dir.path().join("absent"));
        assert!(!store.exists());
        assert!(matches!(store.groups(), Err(StoreError::Io { .. })));
    }

    #[test]
    fn test_entries_skip_hidden_and_image_count_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let group_dir = dir.path().join("carol");
        fs::create_dir(&group_dir).unwrap();
        for name in ["a.jpg", "b.JPEG", "c.png", "d.txt", ".e.png"] {
            fs::write(group_dir.join(name), "x").unwrap();
        }
        fs::create_dir(group_dir.join("nested.png")).unwrap();

        let group = SampleGroup {
            label: label("carol"),
            dir: group_dir,
        };
        assert_eq!(group.entries().unwrap().len(), 4);
        assert_eq!(group.image_count().unwrap(), 3);
    }
}
