//! Face descriptor extraction via ONNX Runtime.
//!
//! Each crop is run through SCRFD for five landmarks, aligned onto a 150x150
//! chip and fed to a ResNet face descriptor network exported to ONNX, which
//! produces a 128-dimensional descriptor.

use crate::alignment::{align_face, CHIP_SIZE};
use crate::image::FaceRegion;
use crate::landmarks::ScrfdLandmarkDetector;
use crate::types::{FaceTemplate, TEMPLATE_LEN};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// Per-channel RGB means the descriptor network was trained with.
const DESCRIPTOR_MEAN_RGB: [f32; 3] = [122.782, 117.001, 104.298];
const DESCRIPTOR_SCALE: f32 = 256.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0} (place the model files in the model directory)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Turns a face crop into a template.
pub trait DescriptorExtractor {
    /// `Ok(None)` means the crop yielded no descriptor, which is a normal
    /// outcome. When the crop holds several faces the most confident is used.
    fn extract(&mut self, face: &FaceRegion) -> Result<Option<FaceTemplate>, RecognizerError>;
}

/// ONNX-backed extractor: landmarks, alignment, then descriptor.
pub struct OnnxDescriptorExtractor {
    landmarks: ScrfdLandmarkDetector,
    session: Session,
}

impl OnnxDescriptorExtractor {
    /// Load the descriptor model and the landmark model.
    pub fn load(
        model_path: impl AsRef<Path>,
        landmark_model_path: impl AsRef<Path>,
    ) -> Result<Self, RecognizerError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }
        let landmarks = ScrfdLandmarkDetector::load(landmark_model_path)?;

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face descriptor model"
        );

        Ok(Self { landmarks, session })
    }

    /// Build a normalised NCHW RGB tensor from an aligned grayscale chip.
    ///
    /// Gray is replicated into R, G and B before per-channel normalisation.
    fn preprocess(chip: &[u8]) -> Array4<f32> {
        let size = CHIP_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for y in 0..size {
            for x in 0..size {
                let pixel = chip[y * size + x] as f32;
                for (c, mean) in DESCRIPTOR_MEAN_RGB.iter().enumerate() {
                    tensor[[0, c, y, x]] = (pixel - mean) / DESCRIPTOR_SCALE;
                }
            }
        }
        tensor
    }
}

impl DescriptorExtractor for OnnxDescriptorExtractor {
    fn extract(&mut self, face: &FaceRegion) -> Result<Option<FaceTemplate>, RecognizerError> {
        let Some(landmarks) = self.landmarks.detect(face.pixels(), face.width(), face.height())? else {
            tracing::debug!(
                width = face.width(),
                height = face.height(),
                "no landmarks in face crop; no descriptor"
            );
            return Ok(None);
        };

        let Some(chip) = align_face(face.pixels(), face.width(), face.height(), &landmarks) else {
            tracing::debug!(landmarks = ?landmarks, "degenerate landmarks; no descriptor");
            return Ok(None);
        };

        let input = Self::preprocess(&chip);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("descriptor extraction: {e}")))?;

        if raw.len() != TEMPLATE_LEN {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {TEMPLATE_LEN}-dim descriptor, got {}",
                raw.len()
            )));
        }

        let values: Vec<f64> = raw.iter().map(|&v| v as f64).collect();
        match FaceTemplate::new(values) {
            Ok(template) => Ok(Some(template)),
            Err(e) => {
                tracing::warn!(error = %e, "descriptor model produced an unusable vector");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preprocess_output_shape() {
        let tensor = OnnxDescriptorExtractor::preprocess(&vec![128u8; CHIP_SIZE * CHIP_SIZE]);
        assert_eq!(tensor.shape(), &[1, 3, CHIP_SIZE, CHIP_SIZE]);
    }

    #[test]
    fn test_preprocess_per_channel_normalisation() {
        let tensor = OnnxDescriptorExtractor::preprocess(&vec![128u8; CHIP_SIZE * CHIP_SIZE]);
        for (c, mean) in DESCRIPTOR_MEAN_RGB.iter().enumerate() {
            let expected = (128.0 - mean) / DESCRIPTOR_SCALE;
            let val = tensor[[0, c, 75, 75]];
            assert!((val - expected).abs() < 1e-6, "channel {c}: got {val}, expected {expected}");
        }
    }

    #[test]
    fn test_preprocess_channels_share_intensity() {
        let chip: Vec<u8> = (0..CHIP_SIZE * CHIP_SIZE).map(|i| (i % 251) as u8).collect();
        let tensor = OnnxDescriptorExtractor::preprocess(&chip);
        // de-normalising every channel recovers the same pixel
        for y in (0..CHIP_SIZE).step_by(7) {
            for x in (0..CHIP_SIZE).step_by(7) {
                let r = tensor[[0, 0, y, x]] * DESCRIPTOR_SCALE + DESCRIPTOR_MEAN_RGB[0];
                let g = tensor[[0, 1, y, x]] * DESCRIPTOR_SCALE + DESCRIPTOR_MEAN_RGB[1];
                let b = tensor[[0, 2, y, x]] * DESCRIPTOR_SCALE + DESCRIPTOR_MEAN_RGB[2];
                assert!((r - g).abs() < 1e-3 && (g - b).abs() < 1e-3);
                assert!((r - chip[y * CHIP_SIZE + x] as f32).abs() < 1e-3);
            }
        }
    }

    #[test]
    fn test_load_missing_descriptor_model() {
        assert!(matches!(
            OnnxDescriptorExtractor::load("/nonexistent/descriptor.onnx", "/nonexistent/det_10g.onnx"),
            Err(RecognizerError::ModelNotFound(path)) if path.contains("descriptor")
        ));
    }

    #[test]
    fn test_load_missing_landmark_model() {
        let dir = tempfile::TempDir::new().unwrap();
        let descriptor = dir.path().join("descriptor.onnx");
        std::fs::write(&descriptor, b"not a model").unwrap();
        assert!(matches!(
            OnnxDescriptorExtractor::load(&descriptor, dir.path().join("det_10g.onnx")),
            Err(RecognizerError::ModelNotFound(path)) if path.contains("det_10g")
        ));
    }
}
