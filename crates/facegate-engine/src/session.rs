//! Per-caller session state: the captured photo and the cached enrollment.

use facegate_core::{FaceTemplate, RawImage};
use facegate_store::CredentialRecord;

/// Identity and template established by the last successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub identity: String,
    pub template: FaceTemplate,
}

impl From<CredentialRecord> for Enrollment {
    fn from(record: CredentialRecord) -> Self {
        Self {
            identity: record.identity,
            template: record.template,
        }
    }
}

/// Observable state of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState<'a> {
    NoPhotoCaptured,
    PhotoCaptured,
    Registered { identity: &'a str },
}

/// One user's interaction with the engine.
///
/// Starts empty. `capture` replaces the photo; the enrollment is only ever
/// replaced by a successful registration.
#[derive(Debug, Default)]
pub struct Session {
    photo: Option<RawImage>,
    enrollment: Option<Enrollment>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a freshly captured frame to the session.
    pub fn capture(&mut self, image: RawImage) {
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            layout = ?image.layout(),
            "photo captured"
        );
        self.photo = Some(image);
    }

    pub fn photo(&self) -> Option<&RawImage> {
        self.photo.as_ref()
    }

    pub fn enrollment(&self) -> Option<&Enrollment> {
        self.enrollment.as_ref()
    }

    pub fn state(&self) -> SessionState<'_> {
        match (&self.photo, &self.enrollment) {
            (None, _) => SessionState::NoPhotoCaptured,
            (Some(_), Some(e)) => SessionState::Registered {
                identity: &e.identity,
            },
            (Some(_), None) => SessionState::PhotoCaptured,
        }
    }

    pub(crate) fn enroll(&mut self, enrollment: Enrollment) {
        self.enrollment = Some(enrollment);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegate_core::PixelLayout;

    fn image() -> RawImage {
        RawImage::new(vec![0u8; 4], 2, 2, PixelLayout::Gray).unwrap()
    }

    fn enrollment(name: &str) -> Enrollment {
        Enrollment {
            identity: name.into(),
            template: FaceTemplate::new(vec![0.0; 4]).unwrap(),
        }
    }

    #[test]
    fn test_state_transitions() {
        let mut session = Session::new();
        assert_eq!(session.state(), SessionState::NoPhotoCaptured);

        session.capture(image());
        assert_eq!(session.state(), SessionState::PhotoCaptured);

        session.enroll(enrollment("alice"));
        assert_eq!(session.state(), SessionState::Registered { identity: "alice" });

        session.enroll(enrollment("bob"));
        assert_eq!(session.state(), SessionState::Registered { identity: "bob" });
    }

    #[test]
    fn test_enrollment_without_photo_reports_no_photo() {
        let mut session = Session::new();
        session.enroll(enrollment("alice"));
        assert_eq!(session.state(), SessionState::NoPhotoCaptured);
        assert_eq!(session.enrollment().map(|e| e.identity.as_str()), Some("alice"));
    }
}
