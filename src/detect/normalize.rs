//! Parsing boundary between detector output and the classifier.
//!
//! "No detections", "detector failed" and "payload malformed" all normalise to
//! the same empty set, so nothing adapter-specific reaches the classifier.

use anyhow::{anyhow, Result};

use super::result::{BoundingBox, DetectedObject, RawDetection, RawDetections};

/// Largest class id accepted from a detection head.
const MAX_CLASS_ID: f32 = 65_535.0;

pub fn normalize_detections(output: Result<RawDetections>) -> Vec<DetectedObject> {
    let raw = match output {
        Ok(raw) => raw,
        Err(err) => {
            log::debug!("detector failed, treating frame as empty: {:#}", err);
            return Vec::new();
        }
    };

    match raw.iter().map(coerce).collect::<Result<Vec<_>>>() {
        Ok(objects) => objects,
        Err(err) => {
            log::debug!("malformed detection payload, treating frame as empty: {}", err);
            Vec::new()
        }
    }
}

fn coerce(raw: &RawDetection) -> Result<DetectedObject> {
    if !raw.class.is_finite() || raw.class < 0.0 || raw.class > MAX_CLASS_ID {
        return Err(anyhow!("class value {} is not a class id", raw.class));
    }
    if !raw.confidence.is_finite() {
        return Err(anyhow!("confidence {} is not finite", raw.confidence));
    }
    if raw.bbox.iter().any(|v| !v.is_finite()) || raw.bbox[2] < 0.0 || raw.bbox[3] < 0.0 {
        return Err(anyhow!("bounding box {:?} is malformed", raw.bbox));
    }
    let [x, y, w, h] = raw.bbox;
    Ok(DetectedObject {
        // Truncation matches how integer class ids are recovered from float
        // tensors.
        class_id: raw.class as u32,
        confidence: raw.confidence.clamp(0.0, 1.0),
        region: BoundingBox { x, y, w, h },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(class: f32) -> RawDetection {
        RawDetection {
            class,
            confidence: 0.9,
            bbox: [0.1, 0.1, 0.2, 0.4],
        }
    }

    #[test]
    fn coerces_float_class_ids() {
        let objects = normalize_detections(Ok(vec![raw(7.0), raw(5.0)]));
        let ids: Vec<u32> = objects.iter().map(|o| o.class_id).collect();
        assert_eq!(ids, vec![7, 5]);
    }

    #[test]
    fn detector_error_is_an_empty_frame() {
        assert!(normalize_detections(Err(anyhow!("inference crashed"))).is_empty());
    }

    #[test]
    fn malformed_payload_is_an_empty_frame() {
        assert!(normalize_detections(Ok(vec![raw(7.0), raw(f32::NAN)])).is_empty());
        assert!(normalize_detections(Ok(vec![raw(-1.0)])).is_empty());
        let mut bad_box = raw(7.0);
        bad_box.bbox[2] = -0.5;
        assert!(normalize_detections(Ok(vec![bad_box])).is_empty());
    }

    #[test]
    fn no_detections_is_an_empty_frame() {
        assert!(normalize_detections(Ok(Vec::new())).is_empty());
    }
}
