use anyhow::Result;

use crate::detect::annotate;
use crate::detect::backend::DetectorBackend;
use crate::detect::result::{DetectionFilter, DetectionSet};
use crate::frame::Frame;
use crate::TeleopError;

/// Detector handle owned by the control loop.
///
/// Wraps a backend so every result leaving it is a filtered `DetectionSet`.
pub struct Perception {
    backend: Box<dyn DetectorBackend>,
}

impl Perception {
    pub fn new(backend: Box<dyn DetectorBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Run the backend and keep only detections `filter` accepts.
    pub fn detect(&mut self, frame: &Frame, filter: &DetectionFilter) -> Result<DetectionSet> {
        let raw = self.backend.detect(frame).map_err(|err| {
            anyhow::Error::new(TeleopError::Detection(format!(
                "{} backend: {:#}",
                self.backend.name(),
                err
            )))
        })?;
        let total = raw.len();
        let set = DetectionSet::filtered(raw, filter);
        if total != set.len() {
            log::trace!("detector kept {} of {} raw detections", set.len(), total);
        }
        Ok(set)
    }

    /// Annotated copy of `frame`.
    pub fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Result<Frame> {
        annotate::annotate(frame, detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubBackend;
    use crate::detect::result::{BoundingBox, Detection};

    #[test]
    fn low_confidence_person_is_absent() {
        let raw = vec![
            Detection::new(0, 0.3, BoundingBox::new(0.1, 0.1, 0.2, 0.2)),
            Detection::new(0, 0.8, BoundingBox::new(0.5, 0.5, 0.2, 0.2)),
        ];
        let mut perception = Perception::new(Box::new(StubBackend::new().with_fixed(raw)));
        let frame = Frame::filled(16, 16, [0, 0, 0]).unwrap();
        let set = perception
            .detect(&frame, &DetectionFilter::new([0], 0.5))
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.as_slice()[0].confidence, 0.8);
    }

    #[test]
    fn backend_failure_is_a_detection_error() {
        let mut perception = Perception::new(Box::new(StubBackend::new().then_fail("boom")));
        let frame = Frame::filled(4, 4, [0, 0, 0]).unwrap();
        let err = perception
            .detect(&frame, &DetectionFilter::new([0], 0.5))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TeleopError>(),
            Some(TeleopError::Detection(msg)) if msg.contains("boom")
        ));
    }
}
