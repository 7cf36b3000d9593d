//! Configuration types for capture sessions

mod file;

pub use file::{ConfigFile, sample_config};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::FrameType;

/// Default wait per acquire
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 1000;
/// Default limit of acquires without pixels or cursor changes per capture
pub const DEFAULT_MAX_SPURIOUS_WAKES: u32 = 16;
/// Default attempts at obtaining the duplication interface
pub const DEFAULT_DUPLICATE_ATTEMPTS: u32 = 2;
/// Default pause between duplication attempts
pub const DEFAULT_DUPLICATE_RETRY_DELAY_MS: u64 = 200;
/// Default GPU thread priority requested at initialize
pub const DEFAULT_GPU_THREAD_PRIORITY: i32 = 7;
/// Default encoder pump limit per H.264 `get_frame`
pub const DEFAULT_MAX_ENCODER_PUMPS: u32 = 64;

/// Capture session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Adapter index
    pub adapter: u32,
    /// Output index on the adapter
    pub output: u32,
    /// Option tokens; "h264" and "yuv420" select the frame type
    pub options: Vec<String>,
    /// Wait per acquire in milliseconds
    pub acquire_timeout_ms: u64,
    /// Acquires without pixels or cursor changes that one `capture` skips
    ///
    /// With `N`, the first `N` such acquires are released and retried; the
    /// next one is released and `capture` returns `TIMEOUT`. `0` gives up on
    /// the first.
    pub max_spurious_wakes: u32,
    /// Attempts at obtaining the duplication interface
    pub duplicate_attempts: u32,
    /// Pause between duplication attempts in milliseconds
    pub duplicate_retry_delay_ms: u64,
    /// GPU thread priority (-7 to 7)
    pub gpu_thread_priority: i32,
    /// Encoder pumps per H.264 `get_frame` before reporting a timeout
    pub max_encoder_pumps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            output: 0,
            options: Vec::new(),
            acquire_timeout_ms: DEFAULT_ACQUIRE_TIMEOUT_MS,
            max_spurious_wakes: DEFAULT_MAX_SPURIOUS_WAKES,
            duplicate_attempts: DEFAULT_DUPLICATE_ATTEMPTS,
            duplicate_retry_delay_ms: DEFAULT_DUPLICATE_RETRY_DELAY_MS,
            gpu_thread_priority: DEFAULT_GPU_THREAD_PRIORITY,
            max_encoder_pumps: DEFAULT_MAX_ENCODER_PUMPS,
        }
    }
}

impl CaptureConfig {
    /// Create a configuration for an adapter/output pair
    pub fn new(adapter: u32, output: u32) -> Self {
        Self {
            adapter,
            output,
            ..Default::default()
        }
    }

    /// Add an option token
    pub fn with_option(mut self, option: impl Into<String>) -> Self {
        self.options.push(option.into());
        self
    }

    /// Select the frame type by option token
    pub fn with_frame_type(self, frame_type: FrameType) -> Self {
        match frame_type {
            FrameType::Raw | FrameType::Invalid => self,
            other => self.with_option(other.token()),
        }
    }

    /// Set the acquire timeout
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the spurious wake limit
    pub fn with_max_spurious_wakes(mut self, limit: u32) -> Self {
        self.max_spurious_wakes = limit;
        self
    }

    /// Set duplication attempts and the delay between them
    pub fn with_duplicate_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.duplicate_attempts = attempts;
        self.duplicate_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the encoder pump limit
    pub fn with_max_encoder_pumps(mut self, limit: u32) -> Self {
        self.max_encoder_pumps = limit;
        self
    }

    /// Frame type selected by the option tokens
    pub fn frame_type(&self) -> FrameType {
        FrameType::from_options(&self.options)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn duplicate_retry_delay(&self) -> Duration {
        Duration::from_millis(self.duplicate_retry_delay_ms)
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        let known = ["h264", "yuv420"];
        for option in &self.options {
            if !known.iter().any(|k| option.eq_ignore_ascii_case(k)) {
                warnings.push(format!("Unknown option '{}' is ignored", option));
            }
        }

        let has_h264 = self.options.iter().any(|o| o.eq_ignore_ascii_case("h264"));
        let has_yuv = self.options.iter().any(|o| o.eq_ignore_ascii_case("yuv420"));
        if has_h264 && has_yuv {
            warnings.push(format!(
                "Both h264 and yuv420 given; the last one wins ({})",
                self.frame_type()
            ));
        }

        if self.acquire_timeout_ms > 5000 {
            warnings.push(format!(
                "Acquire timeout of {}ms makes capture() slow to react to shutdown",
                self.acquire_timeout_ms
            ));
        }

        if self.duplicate_attempts > 10 {
            warnings.push(format!(
                "{} duplication attempts can stall initialize() for {}ms",
                self.duplicate_attempts,
                self.duplicate_attempts as u64 * self.duplicate_retry_delay_ms
            ));
        }

        warnings
    }

    /// Validate and return an error if configuration cannot work
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.acquire_timeout_ms == 0 {
            return Err("Acquire timeout cannot be zero".to_string());
        }

        if self.duplicate_attempts == 0 {
            return Err("At least one duplication attempt is required".to_string());
        }

        if !(-7..=7).contains(&self.gpu_thread_priority) {
            return Err(format!(
                "GPU thread priority {} is outside -7..=7",
                self.gpu_thread_priority
            ));
        }

        if self.max_encoder_pumps == 0 {
            return Err("Encoder pump limit cannot be zero".to_string());
        }

        Ok(())
    }
}
