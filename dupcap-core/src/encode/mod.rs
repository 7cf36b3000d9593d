//! Hardware video encoding
//!
//! This module provides:
//! - The four-event encoder contract driven by the H.264 frame path
//! - NVENC H.264 encoding via FFmpeg (feature `nvenc`)
//! - An in-process encoder for the memory backend
//! - A placeholder for builds without a hardware encoder

mod memory;
#[cfg(feature = "nvenc")]
mod nvenc;

pub use memory::{MEMORY_ENCODER_MAGIC, MemoryEncoder, MemoryEncoderSettings};
#[cfg(feature = "nvenc")]
pub use nvenc::NvencEncoder;

use crate::error::{CaptureError, Result};

/// What the encoder wants next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderEvent {
    /// Nothing to do yet; call `process` again
    Idle,
    /// Ready for another input frame
    NeedsData,
    /// An encoded access unit is ready for `take_output`
    HasData,
    /// The encoder failed
    Error,
}

/// One tightly packed I420 frame
#[derive(Debug, Clone, Copy)]
pub struct YuvFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub y: &'a [u8],
    pub u: &'a [u8],
    pub v: &'a [u8],
}

impl<'a> YuvFrame<'a> {
    /// Split a packed I420 buffer into its planes
    pub fn from_packed(width: u32, height: u32, data: &'a [u8]) -> Result<Self> {
        let [(yw, yh), (cw, ch), _] = crate::formats::yuv420_plane_dims(width, height);
        let y_len = yw as usize * yh as usize;
        let c_len = cw as usize * ch as usize;
        if data.len() < y_len + 2 * c_len {
            return Err(CaptureError::BufferTooSmall {
                needed: y_len + 2 * c_len,
                capacity: data.len(),
            });
        }
        let (y, rest) = data.split_at(y_len);
        let (u, rest) = rest.split_at(c_len);
        Ok(Self {
            width,
            height,
            y,
            u,
            v: &rest[..c_len],
        })
    }
}

/// Encoder driven by the hardware video frame path
pub trait VideoEncoder {
    /// Advance the encoder and report what it needs
    fn process(&mut self) -> EncoderEvent;

    /// Queue an input frame after `NeedsData`
    fn provide_frame(&mut self, frame: &YuvFrame<'_>) -> Result<()>;

    /// Copy the next encoded access unit into `dst` after `HasData`,
    /// returning its size
    fn take_output(&mut self, dst: &mut [u8]) -> Result<usize>;
}

/// Encoder for builds without hardware video support
///
/// Creating one always fails, so the session reports why at initialize.
#[derive(Debug)]
pub enum UnavailableEncoder {}

impl UnavailableEncoder {
    pub fn new() -> Result<Self> {
        Err(CaptureError::Unsupported(
            "H.264 encoding requires the 'nvenc' feature".into(),
        ))
    }
}

impl VideoEncoder for UnavailableEncoder {
    fn process(&mut self) -> EncoderEvent {
        match *self {}
    }

    fn provide_frame(&mut self, _frame: &YuvFrame<'_>) -> Result<()> {
        match *self {}
    }

    fn take_output(&mut self, _dst: &mut [u8]) -> Result<usize> {
        match *self {}
    }
}

/// Check if NVENC H.264 encoding is available in this build and system
pub fn nvenc_available() -> bool {
    #[cfg(feature = "nvenc")]
    {
        nvenc::check_nvenc_available()
    }
    #[cfg(not(feature = "nvenc"))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_encoder_fails() {
        assert!(matches!(
            UnavailableEncoder::new(),
            Err(CaptureError::Unsupported(_))
        ));
    }

    #[test]
    fn test_from_packed_splits_planes() {
        let data: Vec<u8> = (0..24).collect();
        let frame = YuvFrame::from_packed(4, 4, &data).unwrap();
        assert_eq!(frame.y.len(), 16);
        assert_eq!(frame.u, &[16, 17, 18, 19][..]);
        assert_eq!(frame.v, &[20, 21, 22, 23][..]);
        assert!(YuvFrame::from_packed(4, 4, &data[..20]).is_err());
    }
}
