//! rollcall-core: vision engine for the attendance service.
//!
//! Face detection uses SCRFD through ONNX Runtime; identification uses a
//! trainable LBPH classifier. The service only depends on the traits in
//! [`vision`], so either side can be swapped.

pub mod detector;
pub mod frame;
pub mod lbph;
pub mod types;
pub mod vision;

pub use detector::{DetectorError, ScrfdDetector};
pub use frame::{crop_face, decode_payload, FrameError};
pub use lbph::{LbphClassifier, LbphModel, LbphParams};
pub use types::{BoundingBox, Candidate, InputError, PersonLabel};
pub use vision::{ClassifierError, FaceClassifier, FaceDetector, LabeledFace, TrainedModel};

/// Default directory for ONNX model files.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/rollcall/models")
}
