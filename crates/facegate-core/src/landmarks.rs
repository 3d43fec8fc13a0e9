//! Five-point facial landmarks from an SCRFD detector via ONNX Runtime.
//!
//! Runs on a face crop that the cascade already produced. Finding no face in
//! the crop is a normal outcome: the crop then yields no descriptor.

use crate::alignment::Landmarks;
use crate::image::resize_bilinear;
use crate::recognizer::RecognizerError;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;
const SCRFD_MIN_OUTPUTS: usize = 9;

/// Output tensor positions for one stride: (score, keypoints).
type StrideOutputs = (usize, usize);

/// Standard SCRFD export order: scores 8/16/32, boxes 8/16/32, keypoints 8/16/32.
const POSITIONAL_OUTPUTS: [StrideOutputs; 3] = [(0, 6), (1, 7), (2, 8)];

/// Maps letterboxed model coordinates back to the crop.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let scale = (SCRFD_INPUT_SIZE as f32 / width as f32).min(SCRFD_INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: ((SCRFD_INPUT_SIZE as f32 - new_w) / 2.0).floor(),
            pad_y: ((SCRFD_INPUT_SIZE as f32 - new_h) / 2.0).floor(),
        }
    }

    fn to_source(self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    score: f32,
    landmarks: Landmarks,
}

/// SCRFD keypoint detector.
pub struct ScrfdLandmarkDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl ScrfdLandmarkDetector {
    /// Load an SCRFD ONNX model with keypoint outputs.
    pub fn load(model_path: impl AsRef<Path>) -> Result<Self, RecognizerError> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        if names.len() < SCRFD_MIN_OUTPUTS {
            return Err(RecognizerError::InferenceFailed(format!(
                "landmark model needs {SCRFD_MIN_OUTPUTS} outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }
        let outputs = output_positions(&names);

        tracing::info!(
            path = %model_path.display(),
            outputs = ?names,
            mapping = ?outputs,
            "loaded landmark model"
        );

        Ok(Self { session, outputs })
    }

    /// Landmarks of the most confident face in a grayscale crop, if any.
    pub fn detect(&mut self, gray: &[u8], width: u32, height: u32) -> Result<Option<Landmarks>, RecognizerError> {
        let (width, height) = (width as usize, height as usize);
        if width == 0 || height == 0 || gray.len() != width * height {
            return Ok(None);
        }

        let (input, letterbox) = preprocess(gray, width, height);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut best: Option<Candidate> = None;
        for (&stride, &(score_idx, kps_idx)) in SCRFD_STRIDES.iter().zip(self.outputs.iter()) {
            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("keypoints stride {stride}: {e}")))?;

            if let Some(c) = best_in_stride(scores, kps, stride, letterbox, SCRFD_CONFIDENCE_THRESHOLD) {
                if best.map_or(true, |b| c.score > b.score) {
                    best = Some(c);
                }
            }
        }

        match best {
            Some(c) => {
                tracing::debug!(score = c.score, landmarks = ?c.landmarks, "landmarks found");
                Ok(Some(c.landmarks))
            }
            None => Ok(None),
        }
    }
}

/// Letterbox a grayscale crop into a normalised 640x640 NCHW tensor.
fn preprocess(gray: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(width, height);
    let new_w = ((width as f32 * letterbox.scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let new_h = ((height as f32 * letterbox.scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
    let resized = resize_bilinear(gray, width, height, new_w, new_h);
    let (pad_x, pad_y) = (letterbox.pad_x as usize, letterbox.pad_y as usize);

    // padding is left at the mean, which normalises to zero
    let mut tensor = Array4::<f32>::zeros((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE));
    for y in 0..new_h {
        for x in 0..new_w {
            let v = (resized[y * new_w + x] as f32 - SCRFD_MEAN) / SCRFD_STD;
            for c in 0..3 {
                tensor[[0, c, y + pad_y, x + pad_x]] = v;
            }
        }
    }
    (tensor, letterbox)
}

/// Resolve `score_<stride>` / `kps_<stride>` output names, else fall back to
/// the positional layout.
fn output_positions(names: &[String]) -> [StrideOutputs; 3] {
    let find = |prefix: &str, stride: usize| {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == target)
    };

    let named: Option<Vec<StrideOutputs>> = SCRFD_STRIDES
        .iter()
        .map(|&s| Some((find("score", s)?, find("kps", s)?)))
        .collect();

    match named.as_deref() {
        Some(&[a, b, c]) => [a, b, c],
        _ => POSITIONAL_OUTPUTS,
    }
}

/// Highest-scoring anchor above `threshold` in one stride's outputs.
fn best_in_stride(
    scores: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: Letterbox,
    threshold: f32,
) -> Option<Candidate> {
    let grid_w = SCRFD_INPUT_SIZE / stride;
    let anchors = grid_w * grid_w * SCRFD_ANCHORS_PER_CELL;

    let (idx, score) = scores
        .iter()
        .take(anchors)
        .copied()
        .enumerate()
        .filter(|&(i, s)| s > threshold && (i + 1) * 10 <= kps.len())
        .fold(None, |best: Option<(usize, f32)>, (i, s)| match best {
            Some((_, bs)) if bs >= s => best,
            _ => Some((i, s)),
        })?;

    let cell = idx / SCRFD_ANCHORS_PER_CELL;
    let anchor_x = ((cell % grid_w) * stride) as f32;
    let anchor_y = ((cell / grid_w) * stride) as f32;
    let offsets = &kps[idx * 10..idx * 10 + 10];

    let landmarks = std::array::from_fn(|i| {
        let x = anchor_x + offsets[i * 2] * stride as f32;
        let y = anchor_y + offsets[i * 2 + 1] * stride as f32;
        letterbox.to_source(x, y)
    });

    Some(Candidate { score, landmarks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_letterbox_round_trip() {
        let lb = Letterbox::fit(320, 240);
        assert_eq!(lb.scale, 2.0);
        assert_eq!((lb.pad_x, lb.pad_y), (0.0, 80.0));
        let (x, y) = lb.to_source(100.0 * 2.0, 50.0 * 2.0 + 80.0);
        assert!((x - 100.0).abs() < 1e-4 && (y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_preprocess_pads_with_zero() {
        let (tensor, lb) = preprocess(&vec![255u8; 64 * 32], 64, 32);
        assert_eq!(tensor.shape(), &[1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE]);
        assert_eq!(lb.pad_y, 160.0);
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        let inside = (255.0 - SCRFD_MEAN) / SCRFD_STD;
        assert!((tensor[[0, 2, 320, 320]] - inside).abs() < 1e-6);
    }

    #[test]
    fn test_output_positions_named() {
        let shuffled = names(&[
            "bbox_8", "kps_8", "score_8", "bbox_16", "kps_16", "score_16", "bbox_32", "kps_32", "score_32",
        ]);
        assert_eq!(output_positions(&shuffled), [(2, 1), (5, 4), (8, 7)]);
    }

    #[test]
    fn test_output_positions_fallback() {
        let numeric: Vec<String> = (0..9).map(|i| (448 + i).to_string()).collect();
        assert_eq!(output_positions(&numeric), POSITIONAL_OUTPUTS);
    }

    #[test]
    fn test_best_in_stride_decodes_keypoints() {
        let stride = 32;
        let grid = SCRFD_INPUT_SIZE / stride;
        let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
        let mut scores = vec![0.1f32; anchors];
        let mut kps = vec![0.0f32; anchors * 10];

        // cell (x=3, y=2), second anchor
        let idx = (2 * grid + 3) * SCRFD_ANCHORS_PER_CELL + 1;
        scores[idx] = 0.9;
        scores[0] = 0.6;
        kps[idx * 10] = 1.0;
        kps[idx * 10 + 1] = 0.5;

        let identity = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let c = best_in_stride(&scores, &kps, stride, identity, 0.5).unwrap();
        assert_eq!(c.score, 0.9);
        assert_eq!(c.landmarks[0], (3.0 * 32.0 + 32.0, 2.0 * 32.0 + 16.0));
        assert_eq!(c.landmarks[1], (96.0, 64.0));
    }

    #[test]
    fn test_best_in_stride_below_threshold() {
        let stride = 32;
        let anchors = (SCRFD_INPUT_SIZE / stride).pow(2) * SCRFD_ANCHORS_PER_CELL;
        let scores = vec![0.4f32; anchors];
        let kps = vec![0.0f32; anchors * 10];
        let identity = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        assert!(best_in_stride(&scores, &kps, stride, identity, 0.5).is_none());
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            ScrfdLandmarkDetector::load("/nonexistent/det_10g.onnx"),
            Err(RecognizerError::ModelNotFound(_))
        ));
    }
}
