use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Longest label accepted, in bytes.
const MAX_LABEL_LEN: usize = 128;

/// Bounding box for a detected face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// One entry of a classifier ranking: a dense label index and its distance.
///
/// Lower distance = more similar. Distances are not probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub index: i32,
    pub distance: f64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("person label is empty")]
    EmptyLabel,
    #[error("person label exceeds {MAX_LABEL_LEN} bytes")]
    LabelTooLong,
    #[error("person label contains a forbidden character: {0:?}")]
    ForbiddenCharacter(char),
    #[error("person label must not start with '.'")]
    HiddenLabel,
    #[error("image payload is empty")]
    EmptyImage,
}

/// Human-readable identifier of an enrolled person.
///
/// Labels name a directory in the sample store and a column in the
/// tab-delimited ledger, so separators and control characters are rejected.
/// Equality is exact-string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonLabel(String);

impl PersonLabel {
    pub fn new(raw: &str) -> Result<Self, InputError> {
        let label = raw.trim();
        if label.is_empty() {
            return Err(InputError::EmptyLabel);
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(InputError::LabelTooLong);
        }
        if let Some(c) = label
            .chars()
            .find(|c| *c == '/' || *c == '\\' || c.is_control())
        {
            return Err(InputError::ForbiddenCharacter(c));
        }
        // Also covers "." and "..".
        if label.starts_with('.') {
            return Err(InputError::HiddenLabel);
        }
        Ok(Self(label.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PersonLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PersonLabel {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PersonLabel> for String {
    fn from(label: PersonLabel) -> Self {
        label.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_trims_whitespace() {
        let label = PersonLabel::new("  alice ").unwrap();
        assert_eq!(label.as_str(), "alice");
    }

    #[test]
    fn test_label_allows_spaces_and_unicode() {
        assert!(PersonLabel::new("Anne-Marie O'Neil").is_ok());
        assert!(PersonLabel::new("José Núñez").is_ok());
    }

    #[test]
    fn test_label_rejects_empty() {
        assert_eq!(PersonLabel::new("   "), Err(InputError::EmptyLabel));
    }

    #[test]
    fn test_label_rejects_path_separators() {
        assert_eq!(
            PersonLabel::new("../etc"),
            Err(InputError::ForbiddenCharacter('/'))
        );
        assert_eq!(
            PersonLabel::new("a\\b"),
            Err(InputError::ForbiddenCharacter('\\'))
        );
    }

    #[test]
    fn test_label_rejects_tabs_and_newlines() {
        assert_eq!(
            PersonLabel::new("bob\tsmith"),
            Err(InputError::ForbiddenCharacter('\t'))
        );
        assert_eq!(
            PersonLabel::new("bob\nsmith"),
            Err(InputError::ForbiddenCharacter('\n'))
        );
    }

    #[test]
    fn test_label_rejects_hidden_and_dot_names() {
        assert_eq!(PersonLabel::new(".cache"), Err(InputError::HiddenLabel));
        assert_eq!(PersonLabel::new(".."), Err(InputError::HiddenLabel));
    }

    #[test]
    fn test_label_rejects_overlong() {
        let long = "x".repeat(MAX_LABEL_LEN + 1);
        assert_eq!(PersonLabel::new(&long), Err(InputError::LabelTooLong));
    }

    #[test]
    fn test_label_serde_validates() {
        let ok: PersonLabel = serde_json::from_str("\"carol\"").unwrap();
        assert_eq!(ok.as_str(), "carol");
        assert!(serde_json::from_str::<PersonLabel>("\"a/b\"").is_err());
    }
}
