//! Frame annotations handed to the display layer.
//!
//! Drawing is the display's job; this module only decides what to draw.

use serde::Serialize;

use crate::detect::{BoundingBox, DetectedObject};
use crate::frame::Frame;
use crate::policy::ClassLabelPolicy;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Annotation {
    pub region: BoundingBox,
    pub caption: String,
    /// True when the object maps to a violation label.
    pub violation: bool,
}

pub fn annotate(detections: &[DetectedObject], policy: &ClassLabelPolicy) -> Vec<Annotation> {
    detections
        .iter()
        .map(|det| {
            let label = policy.label_for(det.class_id);
            let name = match label {
                Some(label) => label.to_string(),
                None => format!("class {}", det.class_id),
            };
            Annotation {
                region: det.region,
                caption: format!("{} {:.2}", name, det.confidence),
                violation: label.is_some(),
            }
        })
        .collect()
}

/// Receives every processed frame with its annotations.
pub trait FrameSink: Send {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]);

    /// Called once when the session ends, to blank the display.
    fn clear(&mut self) {}
}

/// Discards frames.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, _frame: &Frame, _annotations: &[Annotation]) {}
}

/// Logs one line per annotated frame at debug level.
#[derive(Debug, Default)]
pub struct LogSink;

impl FrameSink for LogSink {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]) {
        if annotations.is_empty() {
            return;
        }
        let captions: Vec<&str> = annotations.iter().map(|a| a.caption.as_str()).collect();
        log::debug!("frame #{}: {}", frame.sequence, captions.join(", "));
    }
}
