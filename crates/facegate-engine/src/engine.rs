//! Enrollment and authentication controller.
//!
//! Every call runs locate, extract, then store or match to completion and
//! reports an [`Outcome`]. Faults in a collaborator surface as [`EngineError`].

use crate::config::Config;
use crate::session::{Enrollment, Session};
use facegate_core::{
    CascadeLocator, DescriptorExtractor, DetectorError, EuclideanMatcher, FaceLocator, FaceRegion,
    FaceTemplate, ImageError, Matcher, OnnxDescriptorExtractor, RawImage, RecognizerError,
    TemplateError,
};
use facegate_store::{CredentialStore, SqliteCredentialStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
    #[error("image error: {0}")]
    Image(#[from] ImageError),
    #[error("identity must not be empty")]
    InvalidIdentity,
}

/// Result of a register or authenticate call.
///
/// Everything except `Accepted` is an ordinary refusal, not a fault.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Registration stored (`distance` is `None`) or authentication matched.
    Accepted {
        identity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance: Option<f64>,
    },
    /// Templates compared but the distance reached the threshold.
    Rejected { distance: f64 },
    NoFaceDetected,
    NoPhotoCaptured,
    NotRegistered,
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    /// Short status line for a name label.
    pub fn label(&self) -> String {
        match self {
            Outcome::Accepted {
                identity,
                distance: None,
            } => format!("Name: {identity}"),
            Outcome::Accepted {
                identity,
                distance: Some(_),
            } => format!("Welcome, {identity}!"),
            _ => "Name: Unknown".to_string(),
        }
    }

    /// User guidance message.
    pub fn message(&self) -> String {
        match self {
            Outcome::Accepted {
                identity,
                distance: None,
            } => format!("Face registered as '{identity}'"),
            Outcome::Accepted {
                identity,
                distance: Some(_),
            } => format!("Welcome, {identity}!"),
            Outcome::Rejected { .. } | Outcome::NoFaceDetected => {
                "Face not recognized. Please try again.".to_string()
            }
            Outcome::NoPhotoCaptured => "Capture a photo first.".to_string(),
            Outcome::NotRegistered => "No registered face found.".to_string(),
        }
    }
}

/// Enrollment/authentication controller.
///
/// Runs locate → extract → (store | match) to completion on every call.
/// Session state lives in the [`Session`] passed in, so one engine can
/// serve any number of sessions one call at a time.
pub struct Engine {
    locator: Box<dyn FaceLocator + Send>,
    extractor: Box<dyn DescriptorExtractor + Send>,
    matcher: EuclideanMatcher,
    store: Arc<dyn CredentialStore + Send + Sync>,
}

impl Engine {
    pub fn new(
        locator: Box<dyn FaceLocator + Send>,
        extractor: Box<dyn DescriptorExtractor + Send>,
        matcher: EuclideanMatcher,
        store: Arc<dyn CredentialStore + Send + Sync>,
    ) -> Self {
        Self {
            locator,
            extractor,
            matcher,
            store,
        }
    }

    /// Load the cascade, the landmark and descriptor models, and open the
    /// credential store.
    ///
    /// Fails fast if any of them is unavailable.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let cascade_path = config.cascade_path();
        let locator = CascadeLocator::load(&cascade_path, config.locator_config())?;
        tracing::info!(path = %cascade_path.display(), "face locator ready");

        let model_path = config.descriptor_model_path();
        let landmark_path = config.landmark_model_path();
        let extractor = OnnxDescriptorExtractor::load(&model_path, &landmark_path)?;
        tracing::info!(
            path = %model_path.display(),
            landmarks = %landmark_path.display(),
            "descriptor extractor ready"
        );

        let store = SqliteCredentialStore::open(&config.db_path)?;

        Ok(Self::new(
            Box::new(locator),
            Box::new(extractor),
            EuclideanMatcher::new(config.match_threshold),
            Arc::new(store),
        ))
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore + Send + Sync> {
        &self.store
    }

    pub fn matcher(&self) -> &EuclideanMatcher {
        &self.matcher
    }

    /// Run only the face locator.
    pub fn locate(&mut self, image: &RawImage) -> Result<Option<FaceRegion>, EngineError> {
        Ok(self.locator.locate(image)?)
    }

    /// Locate a face and extract its template. `None` when either step finds nothing.
    fn describe(&mut self, image: &RawImage) -> Result<Option<(FaceRegion, FaceTemplate)>, EngineError> {
        let Some(face) = self.locator.locate(image)? else {
            tracing::debug!("no face located");
            return Ok(None);
        };
        let Some(template) = self.extractor.extract(&face)? else {
            tracing::debug!(bbox = ?face.bbox, "no descriptor for located face");
            return Ok(None);
        };
        Ok(Some((face, template)))
    }

    /// Enroll the session's captured photo under `identity`.
    ///
    /// On success exactly one record is stored and the session's enrollment
    /// is replaced. The enrollment is only updated after the store write
    /// succeeds; no other path writes to the store.
    pub fn register(&mut self, session: &mut Session, identity: &str) -> Result<Outcome, EngineError> {
        let Some(photo) = session.photo() else {
            return Ok(Outcome::NoPhotoCaptured);
        };
        if identity.trim().is_empty() {
            return Err(EngineError::InvalidIdentity);
        }

        let Some((face, template)) = self.describe(photo)? else {
            tracing::info!(identity, "registration refused: face not recognized");
            return Ok(Outcome::NoFaceDetected);
        };

        let photo_png = face.encode_png()?;
        let record_id = match self.store.insert(identity, &template, &photo_png) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(identity, error = %e, "registration aborted: store write failed");
                return Err(e.into());
            }
        };

        tracing::info!(identity, record_id, bbox = ?face.bbox, "face registered");

        session.enroll(Enrollment {
            identity: identity.to_string(),
            template,
        });

        Ok(Outcome::Accepted {
            identity: identity.to_string(),
            distance: None,
        })
    }

    /// Compare the session's captured photo against its enrollment.
    ///
    /// Never writes to the store and never changes the session.
    pub fn authenticate(&mut self, session: &Session) -> Result<Outcome, EngineError> {
        let Some(photo) = session.photo() else {
            return Ok(Outcome::NoPhotoCaptured);
        };
        let Some(enrollment) = session.enrollment() else {
            return Ok(Outcome::NotRegistered);
        };

        let Some((_, template)) = self.describe(photo)? else {
            tracing::info!("authentication refused: face not recognized");
            return Ok(Outcome::NoFaceDetected);
        };

        let result = self.matcher.compare(&template, &enrollment.template)?;
        if result.matched {
            tracing::info!(
                identity = %enrollment.identity,
                distance = result.distance,
                "authentication accepted"
            );
            Ok(Outcome::Accepted {
                identity: enrollment.identity.clone(),
                distance: Some(result.distance),
            })
        } else {
            tracing::warn!(
                distance = result.distance,
                threshold = self.matcher.threshold,
                "authentication rejected"
            );
            Ok(Outcome::Rejected {
                distance: result.distance,
            })
        }
    }

    /// Seed the session's enrollment from the latest stored record for
    /// `identity`. Returns `false` when the store has none.
    pub fn restore(&self, session: &mut Session, identity: &str) -> Result<bool, EngineError> {
        match self.store.find_latest(identity)? {
            Some(record) => {
                tracing::info!(identity, record_id = record.id, "enrollment restored from store");
                session.enroll(record.into());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_follow_outcome() {
        let registered = Outcome::Accepted {
            identity: "bendavidi".into(),
            distance: None,
        };
        assert_eq!(registered.label(), "Name: bendavidi");
        assert_eq!(registered.message(), "Face registered as 'bendavidi'");

        let welcomed = Outcome::Accepted {
            identity: "bendavidi".into(),
            distance: Some(0.2),
        };
        assert_eq!(welcomed.label(), "Welcome, bendavidi!");

        assert_eq!(Outcome::NotRegistered.label(), "Name: Unknown");
        assert_eq!(Outcome::NotRegistered.message(), "No registered face found.");
        assert_eq!(Outcome::NoPhotoCaptured.message(), "Capture a photo first.");
        assert_eq!(
            Outcome::Rejected { distance: 0.9 }.message(),
            "Face not recognized. Please try again."
        );
    }

    #[test]
    fn test_outcome_serializes_tagged() {
        let json = serde_json::to_value(Outcome::Rejected { distance: 0.75 }).unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "rejected", "distance": 0.75 }));

        let json = serde_json::to_value(Outcome::Accepted {
            identity: "alice".into(),
            distance: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "accepted", "identity": "alice" }));

        let json = serde_json::to_value(Outcome::NoFaceDetected).unwrap();
        assert_eq!(json, serde_json::json!({ "outcome": "no_face_detected" }));
    }
}
