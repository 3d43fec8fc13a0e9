//! Haar cascade face locator over OpenCV's `CascadeClassifier`.
//!
//! Loads the stock OpenCV cascade XML (`haarcascade_frontalface_default.xml`)
//! and runs `detectMultiScale` on the grayscale frame.

use crate::image::{FaceRegion, RawImage};
use crate::types::BoundingBox;
use opencv::core::{Mat, Rect, Scalar, Size, Vector, CV_8UC1};
use opencv::objdetect::CascadeClassifier;
use opencv::prelude::*;
use std::path::Path;
use thiserror::Error;

const DEFAULT_SCALE_FACTOR: f64 = 1.3;
const DEFAULT_MIN_NEIGHBORS: usize = 5;
const DEFAULT_MIN_FACE_SIZE: u32 = 30;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}")]
    CascadeNotFound(String),
    #[error("invalid cascade file: {0}")]
    InvalidCascade(String),
    #[error("invalid locator config: {0}")]
    InvalidConfig(String),
    #[error("opencv: {0}")]
    OpenCv(#[from] opencv::Error),
}

/// Which region to return when the detector finds several faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieBreak {
    /// First region in detector output order.
    #[default]
    DetectorOrder,
    /// Region with the largest area; the earliest wins on equal area.
    Largest,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocatorConfig {
    /// Pyramid step between scales. Smaller steps find more faces, slower.
    pub scale_factor: f64,
    /// A face needs strictly more than this many overlapping raw detections.
    pub min_neighbors: usize,
    /// Smallest face edge, in source pixels.
    pub min_size: u32,
    pub tie_break: TieBreak,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            scale_factor: DEFAULT_SCALE_FACTOR,
            min_neighbors: DEFAULT_MIN_NEIGHBORS,
            min_size: DEFAULT_MIN_FACE_SIZE,
            tie_break: TieBreak::default(),
        }
    }
}

impl LocatorConfig {
    pub fn validate(&self) -> Result<(), DetectorError> {
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(DetectorError::InvalidConfig(format!(
                "scale factor must be > 1.0, got {}",
                self.scale_factor
            )));
        }
        if self.min_size == 0 {
            return Err(DetectorError::InvalidConfig("minimum face size must be > 0".into()));
        }
        if self.min_neighbors > i32::MAX as usize || self.min_size > i32::MAX as u32 {
            return Err(DetectorError::InvalidConfig("locator parameter out of range".into()));
        }
        Ok(())
    }

    /// Pick one region out of detector output according to `tie_break`.
    pub fn choose(&self, faces: &[BoundingBox]) -> Option<BoundingBox> {
        match self.tie_break {
            TieBreak::DetectorOrder => faces.first().copied(),
            TieBreak::Largest => faces.iter().copied().fold(None, |best, f| match best {
                Some(b) if b.area() >= f.area() => Some(b),
                _ => Some(f),
            }),
        }
    }
}

/// Finds the most prominent face in an image.
pub trait FaceLocator {
    /// `Ok(None)` when no face is found; that is a normal outcome.
    fn locate(&mut self, image: &RawImage) -> Result<Option<FaceRegion>, DetectorError>;
}

/// Haar cascade face locator.
pub struct CascadeLocator {
    classifier: CascadeClassifier,
    config: LocatorConfig,
}

impl CascadeLocator {
    /// Load an OpenCV cascade XML file.
    pub fn load(cascade_path: impl AsRef<Path>, config: LocatorConfig) -> Result<Self, DetectorError> {
        config.validate()?;

        let cascade_path = cascade_path.as_ref();
        if !cascade_path.exists() {
            return Err(DetectorError::CascadeNotFound(cascade_path.display().to_string()));
        }
        let path_str = cascade_path
            .to_str()
            .ok_or_else(|| DetectorError::InvalidCascade(cascade_path.display().to_string()))?;

        let classifier = CascadeClassifier::new(path_str)?;
        if classifier.empty()? {
            return Err(DetectorError::InvalidCascade(path_str.to_string()));
        }

        tracing::info!(
            path = %cascade_path.display(),
            scale_factor = config.scale_factor,
            min_neighbors = config.min_neighbors,
            min_size = config.min_size,
            "loaded face cascade"
        );

        Ok(Self { classifier, config })
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// All face rectangles in a grayscale buffer, in detector output order.
    pub fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Vec<BoundingBox>, DetectorError> {
        let expected = width as usize * height as usize;
        if width == 0 || height == 0 || gray.len() != expected {
            return Ok(Vec::new());
        }

        let mut mat = Mat::new_rows_cols_with_default(height as i32, width as i32, CV_8UC1, Scalar::all(0.0))?;
        mat.data_bytes_mut()?.copy_from_slice(gray);

        let min = self.config.min_size as i32;
        let mut rects = Vector::<Rect>::new();
        self.classifier.detect_multi_scale(
            &mat,
            &mut rects,
            self.config.scale_factor,
            self.config.min_neighbors as i32,
            0,
            Size::new(min, min),
            Size::new(0, 0),
        )?;

        let faces: Vec<BoundingBox> = rects
            .iter()
            .filter_map(|r| clamp_to_image(r, width, height))
            .collect();

        tracing::debug!(faces = faces.len(), width, height, "cascade scan finished");
        Ok(faces)
    }
}

impl FaceLocator for CascadeLocator {
    fn locate(&mut self, image: &RawImage) -> Result<Option<FaceRegion>, DetectorError> {
        let gray = image.to_grayscale();
        let faces = self.detect(&gray, image.width(), image.height())?;
        let Some(bbox) = self.config.choose(&faces) else {
            return Ok(None);
        };

        tracing::debug!(
            found = faces.len(),
            x = bbox.x,
            y = bbox.y,
            width = bbox.width,
            height = bbox.height,
            "face located"
        );

        Ok(FaceRegion::crop(&gray, image.width(), image.height(), bbox))
    }
}

/// Convert an OpenCV rectangle, trimming anything past the image border.
fn clamp_to_image(r: Rect, width: u32, height: u32) -> Option<BoundingBox> {
    if r.x < 0 || r.y < 0 || r.width <= 0 || r.height <= 0 {
        return None;
    }
    let (x, y) = (r.x as u32, r.y as u32);
    if x >= width || y >= height {
        return None;
    }
    let clamped = BoundingBox {
        x,
        y,
        width: (r.width as u32).min(width - x),
        height: (r.height as u32).min(height - y),
    };
    clamped.fits_within(width, height).then_some(clamped)
}
