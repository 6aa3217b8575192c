use anyhow::Result;

use crate::detect::result::RawDetections;
use crate::frame::Frame;

/// Object detector collaborator.
///
/// Implementations wrap a model (or a stand-in) and report what they found in
/// one frame, in the model's own loosely typed form. The frame loop never
/// consumes this output directly: it goes through
/// [`normalize_detections`](crate::detect::normalize_detections) first.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on one frame.
    fn detect(&mut self, frame: &Frame) -> Result<RawDetections>;

    /// Optional warm-up hook, run once before the first session.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
