//! Hardware video (H.264) extraction
//!
//! Pumps a [`VideoEncoder`] until it yields an access unit. Input frames are
//! converted through the planar YUV path into a scratch frame; when the
//! encoder asks for data and the desktop has not changed, the previous
//! scratch frame is fed again so the stream keeps its cadence.

use std::time::Instant;

use tracing::{debug, error, trace};

use super::ColorConverter;
use super::planar::PlanarYuvConverter;
use crate::backend::{Device, Duplication};
use crate::capture::FrameAcquisition;
use crate::cursor::CursorRing;
use crate::encode::{EncoderEvent, VideoEncoder, YuvFrame};
use crate::error::{CaptureError, Result};
use crate::formats::yuv420_frame_size;
use crate::types::{CaptureStatus, FrameDescriptor, Point};

pub struct HardwareVideoConverter<D: Device, C, E> {
    planar: PlanarYuvConverter<D, C>,
    encoder: E,
    scratch: Vec<u8>,
    has_scratch: bool,
    width: u32,
    height: u32,
    max_pumps: u32,
}

impl<D, C, E> HardwareVideoConverter<D, C, E>
where
    D: Device,
    C: ColorConverter<D>,
    E: VideoEncoder,
{
    pub fn new(
        planar: PlanarYuvConverter<D, C>,
        encoder: E,
        width: u32,
        height: u32,
        max_pumps: u32,
    ) -> Self {
        Self {
            planar,
            encoder,
            scratch: vec![0; yuv420_frame_size(width, height)],
            has_scratch: false,
            width,
            height,
            max_pumps,
        }
    }

    /// Run the encoder until it produces output, pulling frames as it asks
    ///
    /// Returns `TIMEOUT` when the encoder did not produce output within the
    /// pump limit, and passes `NEEDS_REINIT`/`ERROR` from the engine through.
    /// New frames are waited for only until one acquisition timeout has
    /// passed or an acquire timed out; after that the last frame is repeated.
    pub fn get_frame<S>(
        &mut self,
        device: &D,
        engine: &mut FrameAcquisition<S>,
        ring: &mut CursorRing,
        mut poll_pointer: impl FnMut() -> Option<Point>,
        frame: &mut FrameDescriptor<'_>,
    ) -> Result<CaptureStatus>
    where
        S: Duplication<Texture = D::Texture>,
    {
        let start = Instant::now();
        let mut waited = false;
        for _ in 0..self.max_pumps {
            match self.encoder.process() {
                EncoderEvent::Idle => {}
                EncoderEvent::Error => {
                    error!("Encoder reported an error");
                    return Err(CaptureError::encoder("encoder reported an error"));
                }
                EncoderEvent::HasData => {
                    let len = self.encoder.take_output(frame.buffer_mut())?;
                    trace!("Access unit of {} bytes", len);
                    frame.len = len;
                    frame.pitch = len as u32;
                    frame.stride = self.width;
                    return Ok(CaptureStatus::OK);
                }
                EncoderEvent::NeedsData => {
                    if !engine.is_holding() {
                        if waited {
                            if !self.has_scratch {
                                break;
                            }
                            trace!("Wait spent, repeating last frame");
                            self.feed_scratch()?;
                            continue;
                        }
                        let status = engine.capture(ring, &mut poll_pointer);
                        if status.intersects(CaptureStatus::NEEDS_REINIT | CaptureStatus::ERROR) {
                            return Ok(status);
                        }
                        if !status.contains(CaptureStatus::FRAME_READY) {
                            waited = status.contains(CaptureStatus::TIMEOUT)
                                || start.elapsed() >= engine.timeout();
                            if self.has_scratch {
                                trace!("Desktop unchanged, repeating last frame");
                                self.feed_scratch()?;
                            }
                            continue;
                        }
                    }

                    self.planar.stage_planes(device, engine)?;
                    self.planar.read_planes(device, &mut self.scratch)?;
                    self.has_scratch = true;
                    self.feed_scratch()?;
                }
            }
        }

        debug!("Encoder produced no output after {:?}", start.elapsed());
        Ok(CaptureStatus::TIMEOUT)
    }

    fn feed_scratch(&mut self) -> Result<()> {
        let yuv = YuvFrame::from_packed(self.width, self.height, &self.scratch)?;
        self.encoder.provide_frame(&yuv)
    }
}
