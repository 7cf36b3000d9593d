//! Core types for dupcap
//!
//! These types represent the data exchanged between the capture session, its
//! backends and the caller: status flags, frame descriptors and cursor state.

use serde::{Deserialize, Serialize};

/// Outcome flags of a capture call
///
/// Several flags may be set at once, e.g. `OK | CURSOR_UPDATED` without
/// `FRAME_READY` when only the pointer moved.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CaptureStatus(u8);

impl CaptureStatus {
    /// The call succeeded
    pub const OK: Self = Self(1 << 0);
    /// No frame within the wait window; retry later
    pub const TIMEOUT: Self = Self(1 << 1);
    /// Access lost, desktop switched or mode changed; re-initialize
    pub const NEEDS_REINIT: Self = Self(1 << 2);
    /// Unexpected failure
    pub const ERROR: Self = Self(1 << 3);
    /// A new frame is held and can be read with `get_frame`
    pub const FRAME_READY: Self = Self(1 << 4);
    /// A cursor snapshot was published
    pub const CURSOR_UPDATED: Self = Self(1 << 5);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::OK, "OK"),
        (Self::TIMEOUT, "TIMEOUT"),
        (Self::NEEDS_REINIT, "NEEDS_REINIT"),
        (Self::ERROR, "ERROR"),
        (Self::FRAME_READY, "FRAME_READY"),
        (Self::CURSOR_UPDATED, "CURSOR_UPDATED"),
    ];

    /// No flags set
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bit value
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Whether no flag is set
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Whether every flag in `other` is set
    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any flag in `other` is set
    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Set the flags in `other`
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Clear the flags in `other`
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    /// The call reported a failure (timeout, reinit or error)
    pub const fn is_failure(&self) -> bool {
        self.intersects(Self(Self::TIMEOUT.0 | Self::NEEDS_REINIT.0 | Self::ERROR.0))
    }
}

impl std::ops::BitOr for CaptureStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for CaptureStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl std::fmt::Debug for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CaptureStatus({})", self)
    }
}

impl std::fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "EMPTY");
        }
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, " | ")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Layout produced by `get_frame`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    /// 32-bit BGRA, `width * 4` bytes per row
    Raw,
    /// Three tightly packed planes: Y at full size, U and V at half size
    #[serde(rename = "yuv420")]
    PlanarYuv,
    /// Compressed H.264 access units
    #[serde(rename = "h264")]
    HardwareVideo,
    /// Session not initialized
    Invalid,
}

impl FrameType {
    /// Resolve the frame type from option tokens
    ///
    /// "h264" selects hardware video, "yuv420" selects planar YUV, anything
    /// else leaves the default raw layout. Tokens are case-insensitive and a
    /// later token overrides an earlier one.
    pub fn from_options<S: AsRef<str>>(options: &[S]) -> Self {
        let mut frame_type = Self::Raw;
        for option in options {
            let option = option.as_ref();
            if option.eq_ignore_ascii_case("h264") {
                frame_type = Self::HardwareVideo;
            }
            if option.eq_ignore_ascii_case("yuv420") {
                frame_type = Self::PlanarYuv;
            }
        }
        frame_type
    }

    /// Option token selecting this type
    pub fn token(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::PlanarYuv => "yuv420",
            Self::HardwareVideo => "h264",
            Self::Invalid => "invalid",
        }
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "Raw (BGRA)"),
            Self::PlanarYuv => write!(f, "Planar YUV 4:2:0"),
            Self::HardwareVideo => write!(f, "H.264"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Caller-owned destination for `get_frame`
///
/// The session fills `width`/`height`, the converter sets `pitch`, `stride`
/// and `len`. The buffer length is the capacity; nothing is written past it.
#[derive(Debug)]
pub struct FrameDescriptor<'a> {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bytes per row as delivered
    pub pitch: u32,
    /// Pixels per row
    pub stride: u32,
    /// Bytes written into the buffer
    pub len: usize,
    buffer: &'a mut [u8],
}

impl<'a> FrameDescriptor<'a> {
    /// Wrap a caller buffer
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            width: 0,
            height: 0,
            pitch: 0,
            stride: 0,
            len: 0,
            buffer,
        }
    }

    /// Buffer capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// The whole caller buffer
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        self.buffer
    }

    /// The bytes written by the last conversion
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.len]
    }
}

/// Pixel position in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Cursor shape encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    /// 32-bit BGRA
    #[default]
    Color,
    /// 32-bit BGRA where alpha selects XOR vs. replace
    MaskedColor,
    /// 1-bit AND mask followed by 1-bit XOR mask
    Monochrome,
}

impl CursorType {
    /// Map a DXGI pointer shape type value
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Monochrome),
            2 => Some(Self::Color),
            4 => Some(Self::MaskedColor),
            _ => None,
        }
    }
}

/// Cursor image and its metadata
///
/// The payload buffer only grows; replacing a large shape with a smaller one
/// keeps the allocation.
#[derive(Debug, Clone, Default)]
pub struct CursorShape {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels (monochrome shapes carry both masks, so twice the cursor height)
    pub height: u32,
    /// Bytes per row of the payload
    pub pitch: u32,
    /// Payload encoding
    pub kind: CursorType,
    /// Hot spot offset from the top-left corner
    pub hotspot: Point,
    data: Vec<u8>,
}

impl CursorShape {
    /// Shape payload
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Logical payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated payload capacity in bytes
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Replace the payload, reusing the allocation when it is large enough
    pub fn set_data(&mut self, bytes: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(bytes);
    }

    /// Expose `size` writable bytes, growing the allocation if needed
    pub(crate) fn payload_mut(&mut self, size: usize) -> &mut [u8] {
        self.data.resize(size, 0);
        &mut self.data
    }

    /// Trim the logical size after a backend wrote fewer bytes than reserved
    pub(crate) fn truncate(&mut self, size: usize) {
        self.data.truncate(size);
    }

    /// Drop the payload allocation
    pub(crate) fn release(&mut self) {
        self.data = Vec::new();
    }

    fn copy_from(&mut self, other: &CursorShape) {
        self.width = other.width;
        self.height = other.height;
        self.pitch = other.pitch;
        self.kind = other.kind;
        self.hotspot = other.hotspot;
        self.set_data(&other.data);
    }
}

/// Cursor state published by the capture thread
///
/// `has_position` and `has_shape` flag what changed since the consumer last
/// took a snapshot; `visible` always reflects the current state.
#[derive(Debug, Clone, Default)]
pub struct CursorSnapshot {
    /// Pointer is visible
    pub visible: bool,
    /// `position` carries a new value
    pub has_position: bool,
    /// `shape` carries a new value
    pub has_shape: bool,
    /// Top-left of the cursor image in desktop coordinates
    pub position: Point,
    /// Cursor image
    pub shape: CursorShape,
}

impl CursorSnapshot {
    /// Copy `other` into `self`, reusing the shape allocation
    pub fn copy_from(&mut self, other: &CursorSnapshot) {
        self.visible = other.visible;
        self.has_position = other.has_position;
        self.has_shape = other.has_shape;
        self.position = other.position;
        if other.has_shape {
            self.shape.copy_from(&other.shape);
        }
    }

    /// Fold the unconsumed changes of `older` under the changes staged here
    ///
    /// A field changed in both keeps this snapshot's value; `visible` is
    /// always the current state.
    pub(crate) fn fold_pending(&mut self, older: &CursorSnapshot) {
        if older.has_position && !self.has_position {
            self.has_position = true;
            self.position = older.position;
        }
        if older.has_shape && !self.has_shape {
            self.has_shape = true;
            self.shape.copy_from(&older.shape);
        }
    }

    /// Forget what changed, keeping the buffers
    pub(crate) fn clear_changes(&mut self) {
        self.has_position = false;
        self.has_shape = false;
    }
}

/// Pixel layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 32-bit BGRA
    Bgra8,
    /// 8-bit single channel (one YUV plane)
    R8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Self::Bgra8 => 4,
            Self::R8 => 1,
        }
    }
}

/// Direct3D feature level the device was created at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureLevel {
    Level9_1,
    Level9_2,
    Level9_3,
    Level10_0,
    Level10_1,
    Level11_0,
    Level11_1,
}

impl FeatureLevel {
    /// All levels, highest first (the order requested at device creation)
    pub const PREFERRED: [Self; 7] = [
        Self::Level11_1,
        Self::Level11_0,
        Self::Level10_1,
        Self::Level10_0,
        Self::Level9_3,
        Self::Level9_2,
        Self::Level9_1,
    ];

    /// D3D_FEATURE_LEVEL value
    pub fn raw(&self) -> i32 {
        match self {
            Self::Level9_1 => 0x9100,
            Self::Level9_2 => 0x9200,
            Self::Level9_3 => 0x9300,
            Self::Level10_0 => 0xa000,
            Self::Level10_1 => 0xa100,
            Self::Level11_0 => 0xb000,
            Self::Level11_1 => 0xb100,
        }
    }

    /// Map a D3D_FEATURE_LEVEL value
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|level| level.raw() == raw)
    }
}

impl std::fmt::Display for FeatureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:x}", self.raw())
    }
}

/// Desktop rectangle of an output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub fn width(&self) -> u32 {
        (self.right - self.left).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.bottom - self.top).max(0) as u32
    }
}

/// Information about a display output and the adapter driving it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputInfo {
    /// Adapter index
    pub adapter: u32,
    /// Output index on the adapter
    pub output: u32,
    /// Output device name (e.g. `\\.\DISPLAY1`)
    pub name: String,
    /// Adapter description
    pub adapter_name: String,
    /// PCI vendor id
    pub vendor_id: u32,
    /// PCI device id
    pub device_id: u32,
    /// Dedicated video memory in bytes
    pub dedicated_video_memory: u64,
    /// Dedicated system memory in bytes
    pub dedicated_system_memory: u64,
    /// Shared system memory in bytes
    pub shared_system_memory: u64,
    /// Desktop coordinates
    pub desktop: Rect,
    /// Whether the output is part of the desktop
    pub attached: bool,
}

impl OutputInfo {
    /// Capture size (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        (self.desktop.width(), self.desktop.height())
    }
}

impl std::fmt::Display for OutputInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        write!(
            f,
            "{}:{} {} on {} ({}x{}",
            self.adapter, self.output, self.name, self.adapter_name, width, height
        )?;
        if !self.attached {
            write!(f, ", detached")?;
        }
        write!(f, ")")
    }
}
