use anyhow::Result;

use crate::config::{DetectorKind, DetectorSettings};

use super::backend::Detector;
use super::backends::ScriptedDetector;

/// Build the detector backend named in configuration and warm it up.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = match settings.backend {
        DetectorKind::Stub => Box::new(ScriptedDetector::new(settings.script.clone())),
        DetectorKind::Tract => build_tract(settings)?,
    };
    detector.warm_up()?;
    log::info!("detector backend: {}", detector.name());
    Ok(detector)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let detector = super::backends::TractDetector::new(&settings.model_path)?
        .with_threshold(settings.confidence_threshold);
    Ok(Box::new(detector))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    anyhow::bail!("the tract detector requires the backend-tract feature")
}
