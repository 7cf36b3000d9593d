//! Frame format conversion
//!
//! Turns the held GPU frame into the byte layout selected at initialize:
//! - Raw: tightly packed BGRA
//! - PlanarYuv: Y, U and V planes back to back
//! - HardwareVideo: H.264 access units

mod planar;
mod raw;
mod video;
pub mod yuv;

pub use planar::PlanarYuvConverter;
pub use raw::{RawConverter, copy_rows};
pub use video::HardwareVideoConverter;

use tracing::info;

use crate::backend::{Backend, Device};
use crate::capture::FrameAcquisition;
use crate::config::CaptureConfig;
use crate::cursor::CursorRing;
use crate::error::{CaptureError, Result, ResultExt};
use crate::types::{CaptureStatus, FrameDescriptor, FrameType, Point};

/// GPU color-space conversion from the desktop image to three 8-bit planes
pub trait ColorConverter<D: Device> {
    /// Convert `source` and return the Y, U and V plane textures
    fn convert(&mut self, device: &D, source: &D::Texture) -> Result<[&D::Texture; 3]>;
}

/// Converter for the session's frame type
pub enum FormatConverter<B: Backend> {
    Raw(RawConverter<B::Device>),
    PlanarYuv(PlanarYuvConverter<B::Device, B::Converter>),
    HardwareVideo(HardwareVideoConverter<B::Device, B::Converter, B::Encoder>),
}

impl<B: Backend> FormatConverter<B> {
    /// Allocate the staging surfaces and collaborators a frame type needs
    pub fn new(
        backend: &B,
        device: &B::Device,
        frame_type: FrameType,
        width: u32,
        height: u32,
        config: &CaptureConfig,
    ) -> Result<Self> {
        let converter = match frame_type {
            FrameType::Raw => Self::Raw(RawConverter::new(device, width, height)?),
            FrameType::PlanarYuv => {
                let color = backend
                    .create_converter(device, width, height)
                    .context("creating color converter")?;
                Self::PlanarYuv(PlanarYuvConverter::new(device, color, width, height)?)
            }
            FrameType::HardwareVideo => {
                let color = backend
                    .create_converter(device, width, height)
                    .context("creating color converter")?;
                let planar = PlanarYuvConverter::new(device, color, width, height)?;
                let encoder = backend
                    .create_encoder(width, height)
                    .context("creating video encoder")?;
                Self::HardwareVideo(HardwareVideoConverter::new(
                    planar,
                    encoder,
                    width,
                    height,
                    config.max_encoder_pumps,
                ))
            }
            FrameType::Invalid => {
                return Err(CaptureError::config("no converter for the invalid frame type"));
            }
        };
        info!("Frame converter ready: {}", frame_type);
        Ok(converter)
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Raw(_) => FrameType::Raw,
            Self::PlanarYuv(_) => FrameType::PlanarYuv,
            Self::HardwareVideo(_) => FrameType::HardwareVideo,
        }
    }

    /// Fill `frame` from the held frame
    pub fn get_frame(
        &mut self,
        device: &B::Device,
        engine: &mut FrameAcquisition<B::Duplication>,
        ring: &mut CursorRing,
        poll_pointer: impl FnMut() -> Option<Point>,
        frame: &mut FrameDescriptor<'_>,
    ) -> Result<CaptureStatus> {
        match self {
            Self::Raw(raw) => raw
                .get_frame(device, engine, frame)
                .map(|_| CaptureStatus::OK),
            Self::PlanarYuv(planar) => planar
                .get_frame(device, engine, frame)
                .map(|_| CaptureStatus::OK),
            Self::HardwareVideo(video) => video.get_frame(device, engine, ring, poll_pointer, frame),
        }
    }
}
