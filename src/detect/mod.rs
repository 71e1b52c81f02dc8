//! Object detection: backends, filtering and annotation.

pub mod annotate;
mod backend;
mod backends;
mod perception;
mod registry;
mod result;

pub use annotate::annotate;
pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use perception::Perception;
pub use registry::BackendRegistry;
pub use result::{coco_label, BoundingBox, Detection, DetectionFilter, DetectionSet};
