use serde::Serialize;

/// One entry of a detector's output, as the model reports it.
///
/// Class ids come out of detection heads as floats, so they are carried as
/// `f32` until normalisation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub class: f32,
    pub confidence: f32,
    /// `[x, y, w, h]`, normalised to 0..1.
    pub bbox: [f32; 4],
}

pub type RawDetections = Vec<RawDetection>;

/// Axis-aligned box in normalised (0..1) image coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

/// A validated detection. Lives for one frame; never persisted.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct DetectedObject {
    pub class_id: u32,
    pub confidence: f32,
    pub region: BoundingBox,
}
