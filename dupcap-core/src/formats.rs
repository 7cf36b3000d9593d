//! Pixel format constants and frame geometry
//!
//! Centralizes DXGI format codes and plane size math so the converters, the
//! backends and the session agree on buffer sizes.

use crate::types::{FrameType, PixelFormat};

/// DXGI_FORMAT values used by the capture pipeline
///
/// See: <https://learn.microsoft.com/windows/win32/api/dxgiformat/ne-dxgiformat-dxgi_format>
pub mod dxgi_format {
    /// R8_UNORM - one 8-bit channel, used for each YUV plane
    pub const R8_UNORM: i32 = 61;
    /// B8G8R8A8_UNORM - 32-bit BGRA, the desktop format
    pub const B8G8R8A8_UNORM: i32 = 87;
}

/// DXGI_FORMAT value for a pixel format
pub fn dxgi_format(format: PixelFormat) -> i32 {
    match format {
        PixelFormat::Bgra8 => dxgi_format::B8G8R8A8_UNORM,
        PixelFormat::R8 => dxgi_format::R8_UNORM,
    }
}

/// Bytes per row of a tightly packed BGRA frame
pub fn bgra_pitch(width: u32) -> usize {
    width as usize * 4
}

/// Dimensions of the Y, U and V planes of a 4:2:0 frame
///
/// Chroma planes use the floored half size, so odd dimensions drop the last
/// column or row of chroma samples.
pub fn yuv420_plane_dims(width: u32, height: u32) -> [(u32, u32); 3] {
    let chroma = (width / 2, height / 2);
    [(width, height), chroma, chroma]
}

/// Total bytes of a tightly packed 4:2:0 frame
pub fn yuv420_frame_size(width: u32, height: u32) -> usize {
    yuv420_plane_dims(width, height)
        .iter()
        .map(|(w, h)| *w as usize * *h as usize)
        .sum()
}

/// Worst-case `get_frame` output size for a frame type
///
/// Sized for BGRA regardless of type so one buffer fits any layout; the
/// planar and compressed layouts are always smaller.
pub fn max_frame_size(frame_type: FrameType, width: u32, height: u32) -> usize {
    match frame_type {
        FrameType::Invalid => 0,
        _ => bgra_pitch(width) * height as usize,
    }
}
