//! Duplication backends
//!
//! A backend enumerates outputs, creates the GPU device and hands out the
//! duplication interface the capture engine drives. The DXGI backend talks
//! to the real Windows service; the in-memory backend is scriptable and
//! drives tests and the CLI's synthetic mode.

pub mod memory;

#[cfg(windows)]
pub mod dxgi;

use std::time::Duration;

use thiserror::Error;

use crate::convert::ColorConverter;
use crate::encode::VideoEncoder;
use crate::error::Result;
use crate::types::{CaptureStatus, FeatureLevel, OutputInfo, PixelFormat, Point};

pub use memory::{
    Image, MemoryBackend, MemoryHandle, ScriptedAcquire, ScriptedFrame, ScriptedShape,
};

#[cfg(windows)]
pub use dxgi::DxgiBackend;

/// Failures reported by the duplication service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuplicationError {
    /// No new frame within the wait window
    #[error("wait timed out")]
    Timeout,

    /// Desktop switch, mode change or another process took over
    #[error("access to the duplicated output was lost")]
    AccessLost,

    /// The wait was abandoned by the service
    #[error("wait abandoned")]
    WaitAbandoned,

    /// Call made in the wrong state (e.g. releasing a frame that was not acquired)
    #[error("invalid call")]
    InvalidCall,

    /// Any other service failure
    #[error("{0}")]
    Failed(String),
}

impl DuplicationError {
    /// Status a capture call reports for this failure
    pub fn status(&self) -> CaptureStatus {
        match self {
            Self::Timeout => CaptureStatus::TIMEOUT,
            Self::AccessLost | Self::WaitAbandoned => CaptureStatus::NEEDS_REINIT,
            Self::InvalidCall | Self::Failed(_) => CaptureStatus::ERROR,
        }
    }
}

/// Per-acquire metadata from the duplication service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameInfo {
    /// Non-zero when the desktop image changed
    pub last_present_time: i64,
    /// Non-zero when the pointer position or visibility was reported
    pub last_mouse_update_time: i64,
    /// Pointer position, valid when `last_mouse_update_time` is non-zero
    pub pointer_position: Point,
    /// Pointer visibility, valid when `last_mouse_update_time` is non-zero
    pub pointer_visible: bool,
    /// Size of a new pointer shape, zero when the shape did not change
    pub pointer_shape_size: u32,
}

/// Result of a successful acquire
#[derive(Debug)]
pub struct AcquiredFrame<T> {
    pub info: FrameInfo,
    pub texture: T,
}

/// Pointer shape metadata as reported by the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerShape {
    /// Raw shape type (1 monochrome, 2 color, 4 masked color)
    pub raw_type: u32,
    pub width: u32,
    pub height: u32,
    pub pitch: u32,
    pub hotspot: Point,
    /// Bytes written into the caller buffer
    pub size: usize,
}

/// Read-only view of a mapped staging surface
#[derive(Debug, Clone, Copy)]
pub struct MappedSurface<'a> {
    pub data: &'a [u8],
    /// Bytes per row of `data`, at least `width * bytes_per_pixel`
    pub row_pitch: usize,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// GPU device created for one output
pub trait Device {
    /// Desktop image handed out by the duplication service
    type Texture;
    /// CPU-readable surface
    type Staging;

    /// Feature level the device was created at
    fn feature_level(&self) -> FeatureLevel;

    /// Raise the scheduling priority of the device's GPU work
    fn set_gpu_thread_priority(&self, priority: i32) -> Result<()>;

    /// Allocate a CPU-readable surface
    fn create_staging(&self, width: u32, height: u32, format: PixelFormat) -> Result<Self::Staging>;

    /// Copy a GPU texture into a staging surface
    fn copy_to_staging(&self, source: &Self::Texture, staging: &Self::Staging) -> Result<()>;

    /// Map a staging surface for reading, run `f`, and unmap
    fn read_staging<R>(
        &self,
        staging: &Self::Staging,
        f: impl FnOnce(MappedSurface<'_>) -> Result<R>,
    ) -> Result<R>;
}

/// The duplication interface of one output
///
/// At most one frame may be outstanding; it must be released before the
/// next acquire.
pub trait Duplication {
    type Texture;

    /// Wait up to `timeout` for the next desktop or pointer update
    fn acquire_frame(
        &mut self,
        timeout: Duration,
    ) -> std::result::Result<AcquiredFrame<Self::Texture>, DuplicationError>;

    /// Hand the outstanding frame back to the service
    fn release_frame(&mut self) -> std::result::Result<(), DuplicationError>;

    /// Fetch the pointer shape reported by the last acquire into `buffer`
    fn pointer_shape(
        &mut self,
        buffer: &mut [u8],
    ) -> std::result::Result<PointerShape, DuplicationError>;
}

/// A duplication backend
pub trait Backend {
    type Device: Device;
    type Duplication: Duplication<Texture = <Self::Device as Device>::Texture>;
    type Converter: ColorConverter<Self::Device>;
    type Encoder: VideoEncoder;

    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Whether the current desktop can be captured (false on the secure
    /// desktop or when the session is locked)
    fn can_capture(&self) -> bool;

    /// Enumerate outputs of every adapter
    fn outputs(&self) -> Result<Vec<OutputInfo>>;

    /// Look up an output; it must be attached to the desktop
    fn open_output(&self, adapter: u32, output: u32) -> Result<OutputInfo>;

    /// Create a GPU device on the output's adapter
    fn create_device(&self, output: &OutputInfo) -> Result<Self::Device>;

    /// Create the duplication interface for the output
    fn duplicate_output(
        &self,
        device: &Self::Device,
        output: &OutputInfo,
    ) -> std::result::Result<Self::Duplication, DuplicationError>;

    /// Create the BGRA to planar YUV converter
    fn create_converter(
        &self,
        device: &Self::Device,
        width: u32,
        height: u32,
    ) -> Result<Self::Converter>;

    /// Create the hardware video encoder
    fn create_encoder(&self, width: u32, height: u32) -> Result<Self::Encoder>;

    /// Current pointer position in desktop coordinates
    fn cursor_position(&self) -> Option<Point>;

    /// Called when a session stops using the output
    fn close_output(&self, _output: &OutputInfo) {}
}
