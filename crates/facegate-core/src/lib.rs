//! facegate-core — Face location, descriptor extraction and template matching.
//!
//! Uses an OpenCV Haar cascade for face location, SCRFD landmarks for
//! alignment and a 128-d ResNet descriptor network (via ONNX Runtime) for
//! face templates. Templates are compared by Euclidean distance against a
//! fixed threshold.

pub mod alignment;
pub mod detector;
pub mod image;
pub mod landmarks;
pub mod recognizer;
pub mod types;

pub use alignment::{align_face, Landmarks, CHIP_SIZE};
pub use detector::{CascadeLocator, DetectorError, FaceLocator, LocatorConfig, TieBreak};
pub use image::{FaceRegion, ImageError, PixelLayout, RawImage};
pub use landmarks::ScrfdLandmarkDetector;
pub use recognizer::{DescriptorExtractor, OnnxDescriptorExtractor, RecognizerError};
pub use types::{
    BoundingBox, EuclideanMatcher, FaceTemplate, MatchResult, Matcher, TemplateError,
    DEFAULT_MATCH_THRESHOLD, TEMPLATE_BYTES, TEMPLATE_LEN, TEMPLATE_VERSION,
};
