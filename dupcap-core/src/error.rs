//! Error types for dupcap

use thiserror::Error;

use crate::backend::DuplicationError;
use crate::types::CaptureStatus;

/// Result type alias using CaptureError
pub type Result<T> = std::result::Result<T, CaptureError>;

/// Main error type for dupcap operations
#[derive(Debug, Error)]
pub enum CaptureError {
    /// GPU device creation or device-level failure
    #[error("Device error: {0}")]
    Device(String),

    /// Duplication service failure
    #[error("Duplication error: {0}")]
    Duplication(#[from] DuplicationError),

    /// Staging surface allocation or mapping failure
    #[error("Staging error: {0}")]
    Staging(String),

    /// Color-space conversion failure
    #[error("Converter error: {0}")]
    Converter(String),

    /// Hardware video encoder failure
    #[error("Encoder error: {0}")]
    Encoder(String),

    /// The requested adapter/output pair does not exist
    #[error("Output not found: adapter {adapter}, output {output}")]
    OutputNotFound {
        /// Adapter index
        adapter: u32,
        /// Output index on that adapter
        output: u32,
    },

    /// The output exists but is not part of the desktop
    #[error("Output {0} is not attached to the desktop")]
    OutputNotAttached(String),

    /// Caller buffer cannot hold the converted data
    #[error("Buffer too small: need {needed} bytes, have {capacity}")]
    BufferTooSmall {
        /// Bytes the write would need
        needed: usize,
        /// Bytes still available in the caller buffer
        capacity: usize,
    },

    /// get_frame called without a held frame
    #[error("A frame has not been captured")]
    NoFrame,

    /// Operation requires an initialized session
    #[error("Capture session not initialized")]
    NotInitialized,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<CaptureError>,
    },
}

impl CaptureError {
    /// Create a device error
    pub fn device(msg: impl Into<String>) -> Self {
        Self::Device(msg.into())
    }

    /// Create a staging error
    pub fn staging(msg: impl Into<String>) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a converter error
    pub fn converter(msg: impl Into<String>) -> Self {
        Self::Converter(msg.into())
    }

    /// Create an encoder error
    pub fn encoder(msg: impl Into<String>) -> Self {
        Self::Encoder(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &CaptureError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// Status a capture call reports for this error
    pub fn status(&self) -> CaptureStatus {
        match self.root() {
            Self::Duplication(e) => e.status(),
            _ => CaptureStatus::ERROR,
        }
    }

    /// Get a user-friendly hint for resolving this error
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::Device(_) => Some(
                "Check that a Direct3D 11 capable GPU and driver are installed",
            ),
            Self::Duplication(DuplicationError::AccessLost | DuplicationError::WaitAbandoned) => {
                Some("The desktop switched or the display mode changed; re-initialize the session")
            }
            Self::Duplication(_) => Some(
                "Desktop duplication is unavailable; another application may own it or the session is locked",
            ),
            Self::OutputNotFound { .. } => {
                Some("Run 'dupcap outputs' to list available adapters and outputs")
            }
            Self::OutputNotAttached(_) => {
                Some("Pick an output that is part of the desktop ('dupcap outputs')")
            }
            Self::BufferTooSmall { .. } => {
                Some("Size frame buffers with CaptureSession::max_frame_size()")
            }
            Self::NoFrame => Some("Call capture() and wait for FRAME_READY before get_frame()"),
            Self::NotInitialized => Some("Call initialize() first"),
            Self::Config(_) => Some("Check your config file at ~/.config/dupcap/config.toml"),
            Self::Encoder(_) => Some(
                "Hardware encoding needs an NVIDIA GPU and a build with the 'nvenc' feature",
            ),
            _ => None,
        }
    }

    /// Whether a user can fix this without code changes
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self.root(),
            Self::Duplication(_)
                | Self::OutputNotFound { .. }
                | Self::OutputNotAttached(_)
                | Self::NotInitialized
                | Self::NoFrame
                | Self::Config(_)
        )
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(windows)]
impl<T> ResultExt<T> for windows::core::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| CaptureError::from(e).with_context(context))
    }
}

// Conversions from external error types

#[cfg(windows)]
impl From<windows::core::Error> for CaptureError {
    fn from(err: windows::core::Error) -> Self {
        Self::Device(format!("{} (0x{:08x})", err, err.code().0))
    }
}

#[cfg(feature = "nvenc")]
impl From<ffmpeg_next::Error> for CaptureError {
    fn from(err: ffmpeg_next::Error) -> Self {
        Self::Encoder(err.to_string())
    }
}
