//! V4L2 camera (USB webcams and other local capture devices).
//!
//! The device node is opened on `connect` and closed on `release`; nothing
//! keeps the node open between sessions.

use anyhow::{anyhow, Context, Result};
use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{CameraStats, FrameSource};
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct V4l2Camera {
    settings: CameraSettings,
    state: Option<DeviceState>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: PixelFormat,
}

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Camera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            active_width: settings.width,
            active_height: settings.height,
            settings,
            state: None,
            frame_count: 0,
            active_format: PixelFormat::Rgb24,
        }
    }
}

fn pixel_format(fourcc: v4l::FourCC) -> Result<PixelFormat> {
    match &fourcc.repr {
        b"RGB3" => Ok(PixelFormat::Rgb24),
        b"NV12" => Ok(PixelFormat::Nv12),
        b"YUYV" => Ok(PixelFormat::Yuyv),
        _ => Err(anyhow!("unsupported v4l2 pixel format {}", fourcc)),
    }
}

impl FrameSource for V4l2Camera {
    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.settings.device)
            .with_context(|| format!("open v4l2 device {}", self.settings.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.settings.width;
        format.height = self.settings.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "camera {}: failed to set RGB format: {}",
                    self.settings.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        let active_format = pixel_format(format.fourcc)?;

        if self.settings.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.settings.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "camera {}: failed to set fps: {}",
                    self.settings.device,
                    err
                );
            }
        }

        let state = DeviceStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;

        self.active_width = format.width;
        self.active_height = format.height;
        self.active_format = active_format;
        self.frame_count = 0;
        self.state = Some(state);

        log::info!(
            "camera {} connected ({}x{} {:?})",
            self.settings.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;
        let pixels = normalize_to_rgb(
            buf,
            self.active_width,
            self.active_height,
            self.active_format,
        )?;

        self.frame_count += 1;
        Ok(Frame::new(
            pixels,
            self.active_width,
            self.active_height,
            self.frame_count,
        ))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            log::info!("camera {} released", self.settings.device);
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            frames_captured: self.frame_count,
            device: self.settings.device.clone(),
        }
    }
}
