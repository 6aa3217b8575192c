//! Captured video frames.

use chrono::NaiveDateTime;

use crate::event::local_now;

/// One captured RGB24 frame. Lives for a single loop iteration.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Wall-clock capture time; violation events are stamped with it.
    pub captured_at: NaiveDateTime,
    /// 1-based capture counter within the current connection.
    pub sequence: u64,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, sequence: u64) -> Self {
        Self::captured_at(pixels, width, height, sequence, local_now())
    }

    pub fn captured_at(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
        captured_at: NaiveDateTime,
    ) -> Self {
        Self {
            pixels,
            width,
            height,
            captured_at,
            sequence,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Expected RGB24 byte length for the frame dimensions.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|v| v.checked_mul(3))
    }

    pub fn is_well_formed(&self) -> bool {
        self.expected_len() == Some(self.pixels.len())
    }
}
