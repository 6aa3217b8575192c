mod backend;
mod backends;
mod normalize;
mod registry;
mod result;

pub use backend::Detector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use backends::ScriptedDetector;
pub use normalize::normalize_detections;
pub use registry::build_detector;
pub use result::{BoundingBox, DetectedObject, RawDetection, RawDetections};
