//! Synthetic camera for `stub://` devices.
//!
//! Query parameters shape the camera's behaviour:
//! - `frames=N`: capture fails after N frames (a camera unplugged mid-session)
//! - `offline=1`: `connect` fails (no camera attached)
//!
//! e.g. `stub://yard?frames=100`.

use anyhow::{anyhow, Result};

use super::{CameraStats, FrameSource};
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct SyntheticCamera {
    device: String,
    width: u32,
    height: u32,
    frame_limit: Option<u64>,
    offline: bool,
    open: bool,
    frame_count: u64,
    /// Simulated scene state so consecutive frames differ.
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn new(device: &str, width: u32, height: u32) -> Result<Self> {
        let (_, query) = device.split_once('?').unwrap_or((device, ""));
        let mut frame_limit = None;
        let mut offline = false;
        for pair in query.split('&').filter(|pair| !pair.is_empty()) {
            match pair.split_once('=') {
                Some(("frames", value)) => {
                    frame_limit = Some(value.parse().map_err(|_| {
                        anyhow!("stub camera frames= must be an integer, got '{}'", value)
                    })?);
                }
                Some(("offline", value)) => offline = value == "1" || value == "true",
                _ => return Err(anyhow!("unknown stub camera option '{}'", pair)),
            }
        }
        Ok(Self {
            device: device.to_string(),
            width,
            height,
            frame_limit,
            offline,
            open: false,
            frame_count: 0,
            scene_state: 0,
        })
    }

    pub fn from_settings(settings: &CameraSettings) -> Result<Self> {
        Self::new(&settings.device, settings.width, settings.height)
    }

    fn generate_synthetic_pixels(&mut self) -> Vec<u8> {
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticCamera {
    fn connect(&mut self) -> Result<()> {
        if self.offline {
            return Err(anyhow!("no camera attached at {}", self.device));
        }
        self.open = true;
        self.frame_count = 0;
        log::info!("camera {} connected (synthetic)", self.device);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("camera {} is not open", self.device));
        }
        if self
            .frame_limit
            .is_some_and(|limit| self.frame_count >= limit)
        {
            return Err(anyhow!(
                "camera {} stopped delivering frames after {}",
                self.device,
                self.frame_count
            ));
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels();
        Ok(Frame::new(pixels, self.width, self.height, self.frame_count))
    }

    fn release(&mut self) {
        if self.open {
            self.open = false;
            log::info!("camera {} released", self.device);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.device.clone(),
        }
    }
}
