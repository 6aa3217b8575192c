use anyhow::Result;

use crate::detect::backend::Detector;
use crate::detect::result::{RawDetection, RawDetections};
use crate::frame::Frame;

/// Stub detector that replays a fixed script of class ids, one entry per
/// frame, cycling when the script runs out. An empty script detects nothing.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    script: Vec<Vec<u32>>,
    cursor: usize,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Vec<u32>>) -> Self {
        Self { script, cursor: 0 }
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<RawDetections> {
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let class_ids = &self.script[self.cursor % self.script.len()];
        self.cursor = self.cursor.wrapping_add(1);

        // Lay detections out left to right so overlays do not stack.
        let slot = 1.0 / class_ids.len().max(1) as f32;
        Ok(class_ids
            .iter()
            .enumerate()
            .map(|(i, class_id)| RawDetection {
                class: *class_id as f32,
                confidence: 0.9,
                bbox: [i as f32 * slot, 0.2, slot * 0.8, 0.6],
            })
            .collect())
    }
}
