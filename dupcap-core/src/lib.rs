//! dupcap Core Library
//!
//! Desktop duplication capture: frames, cursor and wire-ready pixel formats.
//!
//! This library provides:
//! - An acquire/release engine for the OS desktop duplication service
//! - Lock-free cursor hand-off to a consumer thread
//! - Raw BGRA, planar YUV 4:2:0 and hardware H.264 frame extraction
//! - A scriptable in-memory backend for tests and synthetic capture
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Duplication     │───▶│ FrameAcquisition │───▶│ FormatConverter │──▶ caller buffer
//! │ (DXGI / memory) │    │ (acquire/release)│    │ (raw/yuv/h264)  │
//! └─────────────────┘    └────────┬─────────┘    └─────────────────┘
//!                                 │ CursorRing
//!                                 ▼
//!                          CursorReader (consumer thread)
//! ```

pub mod backend;
pub mod capture;
pub mod config;
pub mod convert;
pub mod cursor;
pub mod encode;
pub mod error;
pub mod formats;
pub mod stats;
pub mod types;

pub use backend::{Backend, MemoryBackend, MemoryHandle};
#[cfg(windows)]
pub use backend::DxgiBackend;
pub use capture::CaptureSession;
pub use config::{CaptureConfig, ConfigFile};
pub use cursor::CursorReader;
pub use error::{CaptureError, Result};
pub use stats::{CaptureStats, StatsSnapshot};
pub use types::{
    CaptureStatus, CursorShape, CursorSnapshot, CursorType, FrameDescriptor, FrameType,
    OutputInfo, Point,
};
