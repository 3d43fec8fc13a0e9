use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of values in a face descriptor produced by the extractor.
pub const TEMPLATE_LEN: usize = 128;
/// Size of an encoded template: one little-endian f64 per value.
pub const TEMPLATE_BYTES: usize = TEMPLATE_LEN * 8;
/// Encoding version written alongside every persisted template.
pub const TEMPLATE_VERSION: u32 = 1;
/// Euclidean distance below which two templates belong to the same face.
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug, PartialEq)]
pub enum TemplateError {
    #[error("template is empty")]
    Empty,
    #[error("template value {index} is not finite")]
    NonFinite { index: usize },
    #[error("template length mismatch: candidate has {candidate} values, reference has {reference}")]
    LengthMismatch { candidate: usize, reference: usize },
    #[error("encoded template must be {expected} bytes, got {actual}")]
    InvalidEncoding { expected: usize, actual: usize },
    #[error("unsupported template version {0}")]
    UnsupportedVersion(i64),
}

/// Pixel rectangle into an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// True if the box is non-empty and lies entirely inside a `width`×`height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Face descriptor vector.
///
/// Immutable once built. Every value is finite, and the vector is never empty.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceTemplate {
    values: Vec<f64>,
}

impl FaceTemplate {
    pub fn new(values: Vec<f64>) -> Result<Self, TemplateError> {
        if values.is_empty() {
            return Err(TemplateError::Empty);
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(TemplateError::NonFinite { index });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode as consecutive little-endian IEEE-754 binary64 values.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.values.len() * 8);
        for v in &self.values {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode a template persisted under `version`.
    ///
    /// Version 1 is exactly [`TEMPLATE_LEN`] little-endian f64 values.
    pub fn from_le_bytes(bytes: &[u8], version: u32) -> Result<Self, TemplateError> {
        if version != TEMPLATE_VERSION {
            return Err(TemplateError::UnsupportedVersion(version.into()));
        }
        if bytes.len() != TEMPLATE_BYTES {
            return Err(TemplateError::InvalidEncoding {
                expected: TEMPLATE_BYTES,
                actual: bytes.len(),
            });
        }

        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();

        Self::new(values)
    }

    /// Euclidean (L2) distance to another template of the same length.
    pub fn euclidean_distance(&self, other: &FaceTemplate) -> Result<f64, TemplateError> {
        if self.values.len() != other.values.len() {
            return Err(TemplateError::LengthMismatch {
                candidate: self.values.len(),
                reference: other.values.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt())
    }
}

/// Result of comparing a candidate template against a reference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    pub distance: f64,
    pub matched: bool,
}

/// Strategy for deciding whether a candidate template matches a reference.
pub trait Matcher {
    fn compare(
        &self,
        candidate: &FaceTemplate,
        reference: &FaceTemplate,
    ) -> Result<MatchResult, TemplateError>;
}

/// Accepts when the Euclidean distance is strictly below `threshold`.
///
/// Lowering the threshold trades false accepts for false rejects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EuclideanMatcher {
    pub threshold: f64,
}

impl EuclideanMatcher {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        candidate: &FaceTemplate,
        reference: &FaceTemplate,
    ) -> Result<MatchResult, TemplateError> {
        let distance = candidate.euclidean_distance(reference)?;
        Ok(MatchResult {
            distance,
            matched: distance < self.threshold,
        })
    }
}
