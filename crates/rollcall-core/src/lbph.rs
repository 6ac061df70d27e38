//! Local Binary Pattern Histogram face classifier.
//!
//! Each face is resized to a fixed square, encoded as 8-neighbour LBP codes
//! and summarised as a grid of per-cell normalised 256-bin histograms.
//! Ranking compares the query face's histograms against every stored sample with
//! the alternative chi-square distance and keeps the closest sample per label.

use crate::types::Candidate;
use crate::vision::{ClassifierError, FaceClassifier, LabeledFace, TrainedModel};
use image::imageops::{self, FilterType};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

const LBP_BINS: usize = 256;
const CHI_SQUARE_EPSILON: f64 = f64::EPSILON;

/// Default side length faces are normalised to before encoding.
pub const DEFAULT_FACE_SIZE: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub radius: u32,
    pub grid_x: u32,
    pub grid_y: u32,
    pub face_size: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            radius: 1,
            grid_x: 8,
            grid_y: 8,
            face_size: DEFAULT_FACE_SIZE,
        }
    }
}

impl LbphParams {
    /// Smallest face side that leaves at least one LBP code per grid cell.
    pub fn min_face_size(&self) -> u32 {
        2 * self.radius + self.grid_x.max(self.grid_y)
    }

    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.radius == 0 {
            return Err(ClassifierError::InvalidParams("radius must be positive".into()));
        }
        if self.grid_x == 0 || self.grid_y == 0 {
            return Err(ClassifierError::InvalidParams(format!(
                "grid {}x{} has an empty axis",
                self.grid_x, self.grid_y
            )));
        }
        if self.face_size < self.min_face_size() {
            return Err(ClassifierError::InvalidParams(format!(
                "face size {} is below the minimum of {}",
                self.face_size,
                self.min_face_size()
            )));
        }
        Ok(())
    }

    fn histogram_len(&self) -> usize {
        (self.grid_x * self.grid_y) as usize * LBP_BINS
    }

    /// Encode a face as its concatenated spatial histogram.
    fn describe(&self, face: &GrayImage) -> Vec<f32> {
        let size = self.face_size;
        let normalized = if face.dimensions() == (size, size) {
            face.clone()
        } else {
            imageops::resize(face, size, size, FilterType::Triangle)
        };
        let codes = lbp_codes(&normalized, self.radius);
        spatial_histogram(&codes, self.grid_x, self.grid_y)
    }
}

/// LBP code image; `radius` pixels of border are dropped.
fn lbp_codes(image: &GrayImage, radius: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let out_w = width.saturating_sub(2 * radius);
    let out_h = height.saturating_sub(2 * radius);
    let r = radius as i64;
    // Clockwise from top-left; bit 7 is the first neighbour.
    let neighbours: [(i64, i64); 8] = [
        (-r, -r),
        (0, -r),
        (r, -r),
        (r, 0),
        (r, r),
        (0, r),
        (-r, r),
        (-r, 0),
    ];

    GrayImage::from_fn(out_w, out_h, |x, y| {
        let cx = (x + radius) as i64;
        let cy = (y + radius) as i64;
        let center = image.get_pixel(cx as u32, cy as u32).0[0];
        let code = neighbours
            .iter()
            .fold(0u8, |code, &(dx, dy)| {
                let value = image.get_pixel((cx + dx) as u32, (cy + dy) as u32).0[0];
                (code << 1) | u8::from(value >= center)
            });
        image::Luma([code])
    })
}

fn spatial_histogram(codes: &GrayImage, grid_x: u32, grid_y: u32) -> Vec<f32> {
    let (width, height) = codes.dimensions();
    let cell_w = (width / grid_x).max(1);
    let cell_h = (height / grid_y).max(1);
    let mut histogram = vec![0.0f32; (grid_x * grid_y) as usize * LBP_BINS];

    for row in 0..grid_y {
        for col in 0..grid_x {
            let offset = (row * grid_x + col) as usize * LBP_BINS;
            let cell = &mut histogram[offset..offset + LBP_BINS];
            let mut total = 0u32;
            for y in (row * cell_h)..((row + 1) * cell_h).min(height) {
                for x in (col * cell_w)..((col + 1) * cell_w).min(width) {
                    cell[codes.get_pixel(x, y).0[0] as usize] += 1.0;
                    total += 1;
                }
            }
            if total > 0 {
                cell.iter_mut().for_each(|bin| *bin /= total as f32);
            }
        }
    }

    histogram
}

/// Alternative chi-square distance: `2 * sum((a - b)^2 / (a + b))`.
fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    2.0 * a
        .iter()
        .zip(b)
        .map(|(&a, &b)| {
            let (a, b) = (a as f64, b as f64);
            let sum = a + b;
            if sum > CHI_SQUARE_EPSILON {
                (a - b).powi(2) / sum
            } else {
                0.0
            }
        })
        .sum::<f64>()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LbphSample {
    index: i32,
    histogram: Vec<f32>,
}

/// A trained LBPH model: parameters plus one histogram per training sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LbphModel {
    params: LbphParams,
    samples: Vec<LbphSample>,
}

impl LbphModel {
    fn validate(self) -> Result<Self, ClassifierError> {
        self.params
            .validate()
            .map_err(|e| ClassifierError::CorruptModel(e.to_string()))?;
        if self.samples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let expected = self.params.histogram_len();
        if let Some(bad) = self.samples.iter().find(|s| s.histogram.len() != expected) {
            return Err(ClassifierError::CorruptModel(format!(
                "histogram for index {} has {} bins, expected {expected}",
                bad.index,
                bad.histogram.len()
            )));
        }
        Ok(self)
    }
}

impl TrainedModel for LbphModel {
    fn rank(&self, face: &GrayImage) -> Vec<Candidate> {
        let query = self.params.describe(face);

        let mut best: BTreeMap<i32, f64> = BTreeMap::new();
        for sample in &self.samples {
            let distance = chi_square(&sample.histogram, &query);
            best.entry(sample.index)
                .and_modify(|d| *d = d.min(distance))
                .or_insert(distance);
        }

        let mut ranked: Vec<Candidate> = best
            .into_iter()
            .map(|(index, distance)| Candidate { index, distance })
            .collect();
        // Stable sort keeps ascending index order between equal distances.
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        ranked
    }

    fn indices(&self) -> Vec<i32> {
        let mut indices: Vec<i32> = self.samples.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        indices.dedup();
        indices
    }

    fn to_bytes(&self) -> Result<Vec<u8>, ClassifierError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Factory for [`LbphModel`]s.
#[derive(Debug, Clone, Default)]
pub struct LbphClassifier {
    params: LbphParams,
}

impl LbphClassifier {
    pub fn new(params: LbphParams) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl FaceClassifier for LbphClassifier {
    fn train(&self, samples: &[LabeledFace]) -> Result<Arc<dyn TrainedModel>, ClassifierError> {
        if samples.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }

        let samples = samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                if sample.image.width() == 0 || sample.image.height() == 0 {
                    return Err(ClassifierError::DegenerateSample(i));
                }
                Ok(LbphSample {
                    index: sample.index,
                    histogram: self.params.describe(&sample.image),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(samples = samples.len(), params = ?self.params, "LBPH model trained");

        Ok(Arc::new(LbphModel {
            params: self.params,
            samples,
        }))
    }

    fn load(&self, bytes: &[u8]) -> Result<Arc<dyn TrainedModel>, ClassifierError> {
        let model: LbphModel = serde_json::from_slice(bytes)
            .map_err(|e| ClassifierError::CorruptModel(e.to_string()))?;
        Ok(Arc::new(model.validate()?))
    }
}
