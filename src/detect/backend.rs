use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// Backends return the model's raw detections. Class and confidence filtering is
/// NOT the backend's job: `Perception` applies the configured `DetectionFilter`
/// afterwards, so a backend that over-reports cannot break the detection-set
/// invariant.
///
/// Implementations must treat the frame as read-only and must not keep it past
/// the `detect` call.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook, run once before the first frame.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
