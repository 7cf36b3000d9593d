//! Planar YUV 4:2:0 extraction

use tracing::trace;

use super::ColorConverter;
use super::raw::copy_rows;
use crate::backend::{Device, Duplication};
use crate::capture::FrameAcquisition;
use crate::error::{CaptureError, Result, ResultExt};
use crate::formats::yuv420_plane_dims;
use crate::types::{FrameDescriptor, PixelFormat};

/// Converts the held frame to Y, U and V planes and packs them back to back
pub struct PlanarYuvConverter<D: Device, C> {
    converter: C,
    staging: [D::Staging; 3],
    dims: [(u32, u32); 3],
    width: u32,
}

impl<D: Device, C: ColorConverter<D>> PlanarYuvConverter<D, C> {
    pub fn new(device: &D, converter: C, width: u32, height: u32) -> Result<Self> {
        let dims = yuv420_plane_dims(width, height);
        let create = |(w, h): (u32, u32)| {
            device
                .create_staging(w, h, PixelFormat::R8)
                .context(format!("creating {}x{} plane staging surface", w, h))
        };
        let staging = [create(dims[0])?, create(dims[1])?, create(dims[2])?];
        Ok(Self {
            converter,
            staging,
            dims,
            width,
        })
    }

    /// Convert the held frame into the plane staging surfaces and release it
    pub(crate) fn stage_planes<S>(&mut self, device: &D, engine: &mut FrameAcquisition<S>) -> Result<()>
    where
        S: Duplication<Texture = D::Texture>,
    {
        let texture = engine.held_texture().ok_or(CaptureError::NoFrame)?;
        let planes = self.converter.convert(device, texture)?;
        for (plane, staging) in planes.into_iter().zip(&self.staging) {
            device.copy_to_staging(plane, staging)?;
        }
        engine.release()
    }

    /// Copy the staged planes tightly packed into `dst`, returning the bytes written
    ///
    /// Each plane is checked against the remaining capacity before any of
    /// its bytes are written.
    pub(crate) fn read_planes(&self, device: &D, dst: &mut [u8]) -> Result<usize> {
        let mut offset = 0;
        for ((w, h), staging) in self.dims.iter().zip(&self.staging) {
            let (w, h) = (*w as usize, *h as usize);
            let size = w * h;
            let remaining = dst.len() - offset;
            if size > remaining {
                return Err(CaptureError::BufferTooSmall {
                    needed: size,
                    capacity: remaining,
                });
            }

            let out = &mut dst[offset..offset + size];
            device.read_staging(staging, |mapped| {
                copy_rows(out, w, mapped.data, mapped.row_pitch, w, h)
            })?;
            offset += size;
        }
        trace!("Packed {} bytes of YUV 4:2:0", offset);
        Ok(offset)
    }

    pub fn get_frame<S>(
        &mut self,
        device: &D,
        engine: &mut FrameAcquisition<S>,
        frame: &mut FrameDescriptor<'_>,
    ) -> Result<()>
    where
        S: Duplication<Texture = D::Texture>,
    {
        self.stage_planes(device, engine)?;
        frame.len = self.read_planes(device, frame.buffer_mut())?;
        frame.pitch = self.width;
        frame.stride = self.width;
        Ok(())
    }
}
