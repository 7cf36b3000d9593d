//! Raw BGRA extraction

use tracing::trace;

use crate::backend::{Device, Duplication};
use crate::capture::FrameAcquisition;
use crate::error::{CaptureError, Result, ResultExt};
use crate::formats::bgra_pitch;
use crate::types::{FrameDescriptor, PixelFormat};

/// Copies the held desktop image into the caller buffer as tightly packed BGRA
pub struct RawConverter<D: Device> {
    staging: D::Staging,
    width: u32,
    height: u32,
}

impl<D: Device> RawConverter<D> {
    pub fn new(device: &D, width: u32, height: u32) -> Result<Self> {
        let staging = device
            .create_staging(width, height, PixelFormat::Bgra8)
            .context("creating BGRA staging surface")?;
        Ok(Self {
            staging,
            width,
            height,
        })
    }

    /// Copy the held frame out, releasing it back to the service first
    pub fn get_frame<S>(
        &mut self,
        device: &D,
        engine: &mut FrameAcquisition<S>,
        frame: &mut FrameDescriptor<'_>,
    ) -> Result<()>
    where
        S: Duplication<Texture = D::Texture>,
    {
        let texture = engine.held_texture().ok_or(CaptureError::NoFrame)?;
        device.copy_to_staging(texture, &self.staging)?;
        engine.release()?;

        let pitch = bgra_pitch(self.width);
        let height = self.height as usize;
        let dst = frame.buffer_mut();
        let needed = pitch * height;
        if needed > dst.len() {
            return Err(CaptureError::BufferTooSmall {
                needed,
                capacity: dst.len(),
            });
        }

        device.read_staging(&self.staging, |mapped| {
            trace!(
                "Raw copy {}x{} row pitch {} -> {}",
                mapped.width, mapped.height, mapped.row_pitch, pitch
            );
            copy_rows(dst, pitch, mapped.data, mapped.row_pitch, pitch, height)
        })?;

        frame.pitch = pitch as u32;
        frame.stride = self.width;
        frame.len = needed;
        Ok(())
    }
}

/// Copy `height` rows of `row_bytes` from `src` to `dst`
///
/// One block copy when both pitches match the row length, scanline by
/// scanline otherwise. Fails before writing anything if either side is too
/// short.
pub fn copy_rows(
    dst: &mut [u8],
    dst_pitch: usize,
    src: &[u8],
    src_pitch: usize,
    row_bytes: usize,
    height: usize,
) -> Result<()> {
    if height == 0 || row_bytes == 0 {
        return Ok(());
    }
    let row = row_bytes.min(dst_pitch).min(src_pitch);
    let dst_needed = dst_pitch * (height - 1) + row;
    let src_needed = src_pitch * (height - 1) + row;
    if dst_needed > dst.len() {
        return Err(CaptureError::BufferTooSmall {
            needed: dst_needed,
            capacity: dst.len(),
        });
    }
    if src_needed > src.len() {
        return Err(CaptureError::staging(format!(
            "mapped surface holds {} bytes, {} rows of pitch {} need {}",
            src.len(),
            height,
            src_pitch,
            src_needed
        )));
    }

    if dst_pitch == src_pitch && row == dst_pitch {
        let len = dst_pitch * height;
        dst[..len].copy_from_slice(&src[..len]);
    } else {
        for (dst_row, src_row) in dst
            .chunks_mut(dst_pitch)
            .zip(src.chunks(src_pitch))
            .take(height)
        {
            dst_row[..row].copy_from_slice(&src_row[..row]);
        }
    }
    Ok(())
}
