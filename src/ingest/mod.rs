//! Camera frame sources.
//!
//! This module provides the camera resource the frame loop owns:
//! - Synthetic cameras (`stub://` devices) for demos and tests
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source is opened with `connect`, read with `next_frame`, and closed with
//! `release`. `release` is idempotent and must leave the device closed; the
//! frame loop calls it on every exit path.

#[cfg(feature = "ingest-v4l2")]
mod normalize;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use anyhow::{anyhow, Result};

use crate::config::CameraSettings;
use crate::frame::Frame;

pub use synthetic::SyntheticCamera;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Camera;

/// A camera the frame loop can own for the duration of a session.
pub trait FrameSource: Send {
    /// Open the device. Failing here means the device is unavailable.
    fn connect(&mut self) -> Result<()>;

    /// Capture the next frame. Failing here ends the session.
    fn next_frame(&mut self) -> Result<Frame>;

    /// Close the device. Safe to call when already closed.
    fn release(&mut self);

    fn is_open(&self) -> bool;

    fn stats(&self) -> CameraStats;
}

/// Statistics for a camera.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct CameraStats {
    pub frames_captured: u64,
    pub device: String,
}

/// Camera selected from a device string.
///
/// `stub://` devices produce synthetic frames; `/dev/video*` paths use V4L2.
pub struct CameraSource {
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticCamera),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Camera),
}

impl CameraSource {
    pub fn new(settings: &CameraSettings) -> Result<Self> {
        if settings.device.starts_with("stub://") {
            return Ok(Self {
                backend: CameraBackend::Synthetic(SyntheticCamera::from_settings(settings)?),
            });
        }
        if settings.device.starts_with("/dev/video") {
            #[cfg(feature = "ingest-v4l2")]
            {
                return Ok(Self {
                    backend: CameraBackend::Device(V4l2Camera::new(settings.clone())),
                });
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                return Err(anyhow!(
                    "camera {} requires the ingest-v4l2 feature",
                    settings.device
                ));
            }
        }
        Err(anyhow!(
            "unsupported camera device '{}' (expected stub://… or /dev/video…)",
            settings.device
        ))
    }
}

impl FrameSource for CameraSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.connect(),
        }
    }

    fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.release(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.release(),
        }
    }

    fn is_open(&self) -> bool {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.is_open(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.is_open(),
        }
    }

    fn stats(&self) -> CameraStats {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.stats(),
        }
    }
}
