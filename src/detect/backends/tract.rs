#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::Detector;
use crate::detect::result::{RawDetection, RawDetections};
use crate::frame::Frame;

const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const MAX_DETECTIONS: usize = 100;

/// Tract-based YOLO detector for ONNX exports.
///
/// Expects a single `[1, 3, S, S]` RGB input and a `[1, 4 + classes, anchors]`
/// output with centre-format boxes in input pixels. Frames are resized to the
/// model input with nearest-neighbour sampling.
pub struct TractDetector {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractDetector {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = DEFAULT_INPUT_SIZE as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: 0.25,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if !frame.is_well_formed() {
            return Err(anyhow!(
                "expected {}x{} RGB frame, received {} bytes",
                frame.width,
                frame.height,
                frame.pixels().len()
            ));
        }

        let size = self.input_size as usize;
        let (src_w, src_h) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            let sx = x * src_w / size;
            let sy = y * src_h / size;
            pixels[(sy * src_w + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>) -> Result<RawDetections> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("model output is not [1, 4 + classes, anchors]")?;
        let candidates = decode_predictions(
            view,
            self.input_size as f32,
            self.confidence_threshold,
        )?;
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }
}

/// Best class per anchor above `threshold`, boxes scaled to `[0, 1]`.
fn decode_predictions(
    view: tract_ndarray::ArrayView3<f32>,
    scale: f32,
    threshold: f32,
) -> Result<RawDetections> {
    let (batch, channels, anchors) = view.dim();
    if batch == 0 {
        return Err(anyhow!("model output has an empty batch dimension"));
    }
    if channels <= 4 {
        return Err(anyhow!("model output has no class channels"));
    }

    let mut candidates = Vec::new();
    for a in 0..anchors {
        let (class, confidence) = (4..channels)
            .map(|c| (c - 4, view[[0, c, a]]))
            .fold((0, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if confidence < threshold {
            continue;
        }
        let (cx, cy, w, h) = (
            view[[0, 0, a]],
            view[[0, 1, a]],
            view[[0, 2, a]],
            view[[0, 3, a]],
        );
        candidates.push(RawDetection {
            class: class as f32,
            confidence,
            bbox: [
                (cx - w / 2.0) / scale,
                (cy - h / 2.0) / scale,
                w / scale,
                h / scale,
            ],
        });
    }
    Ok(candidates)
}

/// Greedy per-class NMS, highest confidence first.
fn non_max_suppression(mut candidates: RawDetections, iou_threshold: f32) -> RawDetections {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: RawDetections = Vec::new();
    for cand in candidates {
        let overlaps = keep
            .iter()
            .any(|k| k.class == cand.class && iou(&k.bbox, &cand.bbox) >= iou_threshold);
        if !overlaps {
            keep.push(cand);
            if keep.len() == MAX_DETECTIONS {
                break;
            }
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);
    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a[2] * a[3] + b[2] * b[3] - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

impl Detector for TractDetector {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<RawDetections> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs)
    }
}
