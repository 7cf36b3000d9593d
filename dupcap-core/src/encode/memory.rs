//! In-process encoder for the memory backend
//!
//! Emits each input frame as an access unit made of a small header and the
//! I420 payload, after a configurable number of `process` calls. It follows
//! the same event contract as a hardware encoder so the H.264 frame path can
//! be driven without a GPU.

use std::collections::VecDeque;

use tracing::trace;

use super::{EncoderEvent, VideoEncoder, YuvFrame};
use crate::error::{CaptureError, Result};

/// Leading bytes of every access unit
pub const MEMORY_ENCODER_MAGIC: [u8; 4] = *b"DCAU";

/// Header size: magic plus a little-endian frame index
const HEADER_LEN: usize = 8;

/// Behaviour knobs for [`MemoryEncoder`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryEncoderSettings {
    /// `process` calls returning `Idle` before a provided frame becomes output
    pub latency: u32,
    /// Frames held back before the oldest one starts encoding
    pub lookahead: u32,
    /// Report `Error` once this many frames were provided
    pub fail_after_frames: Option<u64>,
}

struct Pending {
    ticks_left: u32,
    unit: Vec<u8>,
}

/// Deterministic encoder with passthrough output
pub struct MemoryEncoder {
    width: u32,
    height: u32,
    settings: MemoryEncoderSettings,
    pending: VecDeque<Pending>,
    ready: VecDeque<Vec<u8>>,
    frames_in: u64,
}

impl MemoryEncoder {
    pub fn new(width: u32, height: u32, settings: MemoryEncoderSettings) -> Self {
        Self {
            width,
            height,
            settings,
            pending: VecDeque::new(),
            ready: VecDeque::new(),
            frames_in: 0,
        }
    }

    /// Frames provided so far
    pub fn frames_in(&self) -> u64 {
        self.frames_in
    }
}

impl VideoEncoder for MemoryEncoder {
    fn process(&mut self) -> EncoderEvent {
        if let Some(limit) = self.settings.fail_after_frames
            && self.frames_in >= limit
        {
            return EncoderEvent::Error;
        }
        if !self.ready.is_empty() {
            return EncoderEvent::HasData;
        }
        if self.pending.len() <= self.settings.lookahead as usize {
            return EncoderEvent::NeedsData;
        }
        let Some(front) = self.pending.front_mut() else {
            return EncoderEvent::NeedsData;
        };
        if front.ticks_left > 0 {
            front.ticks_left -= 1;
            return EncoderEvent::Idle;
        }
        if let Some(done) = self.pending.pop_front() {
            self.ready.push_back(done.unit);
        }
        EncoderEvent::HasData
    }

    fn provide_frame(&mut self, frame: &YuvFrame<'_>) -> Result<()> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CaptureError::encoder(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let mut unit =
            Vec::with_capacity(HEADER_LEN + frame.y.len() + frame.u.len() + frame.v.len());
        unit.extend_from_slice(&MEMORY_ENCODER_MAGIC);
        unit.extend_from_slice(&(self.frames_in as u32).to_le_bytes());
        unit.extend_from_slice(frame.y);
        unit.extend_from_slice(frame.u);
        unit.extend_from_slice(frame.v);

        trace!("Queued access unit {} ({} bytes)", self.frames_in, unit.len());
        self.pending.push_back(Pending {
            ticks_left: self.settings.latency,
            unit,
        });
        self.frames_in += 1;
        Ok(())
    }

    fn take_output(&mut self, dst: &mut [u8]) -> Result<usize> {
        let unit = self
            .ready
            .pop_front()
            .ok_or_else(|| CaptureError::encoder("no encoded output ready"))?;
        if unit.len() > dst.len() {
            let needed = unit.len();
            self.ready.push_front(unit);
            return Err(CaptureError::BufferTooSmall {
                needed,
                capacity: dst.len(),
            });
        }
        dst[..unit.len()].copy_from_slice(&unit);
        Ok(unit.len())
    }
}
