//! Capture session lifecycle
//!
//! A [`CaptureSession`] owns its backend and, while initialized, the GPU
//! device, the duplication engine and the frame converter for one output.
//! Everything it allocates is released by `deinitialize`, by a failed
//! `initialize`, or when the session is dropped.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use super::engine::FrameAcquisition;
use crate::backend::{Backend, Device, DuplicationError};
use crate::config::CaptureConfig;
use crate::convert::FormatConverter;
use crate::cursor::{CursorReader, CursorRing, cursor_channel};
use crate::error::{CaptureError, Result, ResultExt};
use crate::formats;
use crate::stats::CaptureStats;
use crate::types::{CaptureStatus, FrameDescriptor, FrameType, OutputInfo};

/// Resources held while initialized
///
/// Fields drop in order: the engine hands back any outstanding frame and
/// closes the duplication before the staging surfaces and the device go.
struct ActiveSession<B: Backend> {
    engine: FrameAcquisition<B::Duplication>,
    converter: FormatConverter<B>,
    device: B::Device,
    output: OutputInfo,
}

/// Desktop duplication capture session for one output
pub struct CaptureSession<B: Backend> {
    backend: B,
    config: CaptureConfig,
    cursor: CursorRing,
    reader: Option<CursorReader>,
    stats: Arc<CaptureStats>,
    active: Option<ActiveSession<B>>,
}

impl<B: Backend> CaptureSession<B> {
    /// Create an uninitialized session
    pub fn new(backend: B, config: CaptureConfig) -> Self {
        for warning in config.validate() {
            warn!("{}", warning);
        }
        let (cursor, reader) = cursor_channel();
        Self {
            backend,
            config,
            cursor,
            reader: Some(reader),
            stats: Arc::new(CaptureStats::new()),
            active: None,
        }
    }

    /// Whether the current desktop can be captured
    pub fn can_capture(&self) -> bool {
        self.backend.can_capture()
    }

    /// Initialize, logging the failure reason; returns whether it succeeded
    pub fn initialize(&mut self) -> bool {
        match self.try_initialize() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to initialize capture: {}", e);
                if let Some(hint) = e.user_hint() {
                    info!("Hint: {}", hint);
                }
                false
            }
        }
    }

    /// Initialize, returning the failure reason
    ///
    /// An initialized session is deinitialized first. On failure every
    /// partially created resource is released before returning.
    pub fn try_initialize(&mut self) -> Result<()> {
        if self.active.is_some() {
            debug!("Re-initializing capture session");
            self.deinitialize();
        }
        self.config.validate_strict().map_err(CaptureError::Config)?;

        let output = self
            .backend
            .open_output(self.config.adapter, self.config.output)?;

        match self.build(&output) {
            Ok(active) => {
                self.cursor.reset();
                self.active = Some(active);
                Ok(())
            }
            Err(e) => {
                self.backend.close_output(&output);
                Err(e)
            }
        }
    }

    fn build(&self, output: &OutputInfo) -> Result<ActiveSession<B>> {
        let (width, height) = output.dimensions();
        info!("Backend: {}", self.backend.name());
        info!(
            "Device Description: {} (vendor 0x{:04x}, device 0x{:04x})",
            output.adapter_name, output.vendor_id, output.device_id
        );
        info!(
            "Video memory: {} MiB dedicated, {} MiB system, {} MiB shared",
            output.dedicated_video_memory / (1024 * 1024),
            output.dedicated_system_memory / (1024 * 1024),
            output.shared_system_memory / (1024 * 1024)
        );
        info!("Capture Size: {} x {} ({})", width, height, output.name);

        let device = self
            .backend
            .create_device(output)
            .context("creating capture device")?;
        info!("Feature Level: {}", device.feature_level());

        let frame_type = self.config.frame_type();
        info!("Frame Type: {}", frame_type);
        let converter =
            FormatConverter::new(&self.backend, &device, frame_type, width, height, &self.config)?;

        if let Err(e) = device.set_gpu_thread_priority(self.config.gpu_thread_priority) {
            warn!(
                "Failed to set GPU thread priority {}: {}",
                self.config.gpu_thread_priority, e
            );
        }

        let duplication = self.duplicate_with_retry(&device, output)?;
        let engine = FrameAcquisition::new(duplication, &self.config, Arc::clone(&self.stats));

        Ok(ActiveSession {
            engine,
            converter,
            device,
            output: output.clone(),
        })
    }

    fn duplicate_with_retry(
        &self,
        device: &B::Device,
        output: &OutputInfo,
    ) -> Result<B::Duplication> {
        let attempts = self.config.duplicate_attempts.max(1);
        let mut last_error = DuplicationError::Failed("no duplication attempt made".into());
        for attempt in 1..=attempts {
            match self.backend.duplicate_output(device, output) {
                Ok(duplication) => {
                    debug!("Duplicated {} on attempt {}", output.name, attempt);
                    return Ok(duplication);
                }
                Err(e) => {
                    warn!(
                        "Duplicating output failed (attempt {}/{}): {}",
                        attempt, attempts, e
                    );
                    last_error = e;
                    if attempt < attempts {
                        std::thread::sleep(self.config.duplicate_retry_delay());
                    }
                }
            }
        }
        Err(CaptureError::from(last_error).with_context("duplicating output"))
    }

    /// Release every resource; safe to call when not initialized
    pub fn deinitialize(&mut self) {
        if let Some(active) = self.active.take() {
            let output = active.output.clone();
            drop(active);
            self.backend.close_output(&output);
            info!("Capture session for {} deinitialized", output.name);
        }
        self.cursor.reset();
    }

    pub fn is_initialized(&self) -> bool {
        self.active.is_some()
    }

    /// Frame layout `get_frame` produces; `Invalid` when not initialized
    pub fn frame_type(&self) -> FrameType {
        self.active
            .as_ref()
            .map(|a| a.converter.frame_type())
            .unwrap_or(FrameType::Invalid)
    }

    /// Buffer size that fits any frame; 0 when not initialized
    pub fn max_frame_size(&self) -> usize {
        match self.dimensions() {
            Some((width, height)) => formats::max_frame_size(self.frame_type(), width, height),
            None => 0,
        }
    }

    /// Capture size (width, height)
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.active.as_ref().map(|a| a.output.dimensions())
    }

    /// The output being duplicated
    pub fn output(&self) -> Option<&OutputInfo> {
        self.active.as_ref().map(|a| &a.output)
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Shared capture counters
    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }

    /// Hand out the cursor consumer
    ///
    /// There is one consumer per session; later calls return `None`.
    pub fn cursor_reader(&mut self) -> Option<CursorReader> {
        self.reader.take()
    }

    /// Wait for the next desktop or cursor update
    pub fn capture(&mut self) -> CaptureStatus {
        let Some(active) = self.active.as_mut() else {
            error!("capture() called on an uninitialized session");
            return CaptureStatus::ERROR;
        };

        let backend = &self.backend;
        active
            .engine
            .capture(&mut self.cursor, || backend.cursor_position())
    }

    /// Convert the held frame into `frame`
    pub fn get_frame(&mut self, frame: &mut FrameDescriptor<'_>) -> CaptureStatus {
        frame.len = 0;
        let Some(active) = self.active.as_mut() else {
            error!("get_frame() called on an uninitialized session");
            return CaptureStatus::ERROR;
        };
        if !active.engine.is_holding() {
            error!("{}", CaptureError::NoFrame);
            self.stats
                .record_get_frame(CaptureStatus::ERROR, 0, std::time::Duration::ZERO);
            return CaptureStatus::ERROR;
        }

        let (width, height) = active.output.dimensions();
        frame.width = width;
        frame.height = height;

        let start = Instant::now();
        let backend = &self.backend;
        let result = active.converter.get_frame(
            &active.device,
            &mut active.engine,
            &mut self.cursor,
            || backend.cursor_position(),
            frame,
        );
        let status = match result {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to get frame: {}", e);
                e.status()
            }
        };
        self.stats.record_get_frame(status, frame.len, start.elapsed());
        status
    }
}

impl<B: Backend> Drop for CaptureSession<B> {
    fn drop(&mut self) {
        self.deinitialize();
    }
}
