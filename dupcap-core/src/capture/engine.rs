//! Frame acquisition state machine
//!
//! Drives the acquire/inspect/release protocol against a [`Duplication`]:
//! at most one service frame is outstanding, it is always released before
//! the next acquire, and every acquire is classified into a
//! [`CaptureStatus`]. Cursor changes reported alongside a frame are staged
//! into the cursor ring and published once per acquire.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, trace, warn};

use crate::backend::{AcquiredFrame, Duplication, DuplicationError, FrameInfo};
use crate::config::CaptureConfig;
use crate::cursor::CursorRing;
use crate::error::Result;
use crate::stats::CaptureStats;
use crate::types::{CaptureStatus, CursorType, Point};

enum FrameState<T> {
    /// Nothing outstanding
    Idle,
    /// A service frame is outstanding but carries no new pixels
    Acquired,
    /// A service frame with new pixels is outstanding
    Held(T),
}

/// Last cursor state seen, to detect changes
#[derive(Debug, Default)]
struct CursorCache {
    position: Option<Point>,
    hotspot: Point,
    visible: bool,
}

/// Acquire/release engine for one duplicated output
pub struct FrameAcquisition<D: Duplication> {
    duplication: D,
    state: FrameState<D::Texture>,
    timeout: Duration,
    max_spurious_wakes: u32,
    cursor: CursorCache,
    needs_reinit: bool,
    stats: Arc<CaptureStats>,
}

impl<D: Duplication> FrameAcquisition<D> {
    pub fn new(duplication: D, config: &CaptureConfig, stats: Arc<CaptureStats>) -> Self {
        Self {
            duplication,
            state: FrameState::Idle,
            timeout: config.acquire_timeout(),
            max_spurious_wakes: config.max_spurious_wakes,
            cursor: CursorCache::default(),
            needs_reinit: false,
            stats,
        }
    }

    /// Wait for the next desktop or cursor update
    ///
    /// `poll_pointer` is consulted when the service did not report a pointer
    /// position with the frame. Every outcome is counted in the stats.
    pub fn capture(
        &mut self,
        ring: &mut CursorRing,
        poll_pointer: impl FnMut() -> Option<Point>,
    ) -> CaptureStatus {
        let status = self.acquire_next(ring, poll_pointer);
        self.stats.record_capture(status);
        status
    }

    /// Acquisition timeout of a single `capture()`
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn acquire_next(
        &mut self,
        ring: &mut CursorRing,
        mut poll_pointer: impl FnMut() -> Option<Point>,
    ) -> CaptureStatus {
        if self.needs_reinit {
            return CaptureStatus::NEEDS_REINIT;
        }

        let mut spurious_wakes = 0u32;
        loop {
            if let Err(e) = self.release_outstanding() {
                return self.classify_release(e);
            }

            let AcquiredFrame { info, texture } = match self.duplication.acquire_frame(self.timeout) {
                Ok(frame) => frame,
                Err(e) => return self.classify_acquire(e),
            };
            self.state = FrameState::Acquired;

            let mut status = CaptureStatus::OK;
            match self.update_cursor(ring, &info, &mut poll_pointer) {
                Ok(true) => status |= CaptureStatus::CURSOR_UPDATED,
                Ok(false) => {}
                Err(status) => return status,
            }

            if info.last_present_time == 0 {
                if status.contains(CaptureStatus::CURSOR_UPDATED) {
                    trace!("Cursor-only update");
                    return status;
                }

                spurious_wakes += 1;
                self.stats.record_spurious_wake();
                if spurious_wakes > self.max_spurious_wakes {
                    debug!(
                        "{} acquires without pixels or cursor changes, giving up",
                        spurious_wakes
                    );
                    if let Err(e) = self.release_outstanding() {
                        return self.classify_release(e);
                    }
                    return CaptureStatus::TIMEOUT;
                }
                continue;
            }

            self.state = FrameState::Held(texture);
            return status | CaptureStatus::FRAME_READY;
        }
    }

    /// The frame captured by the last `capture()`, if still held
    pub fn held_texture(&self) -> Option<&D::Texture> {
        match &self.state {
            FrameState::Held(texture) => Some(texture),
            _ => None,
        }
    }

    /// Whether a frame with pixels is held
    pub fn is_holding(&self) -> bool {
        matches!(self.state, FrameState::Held(_))
    }

    /// Whether the service reported lost access
    pub fn needs_reinit(&self) -> bool {
        self.needs_reinit
    }

    /// Hand the outstanding frame back to the service
    pub fn release(&mut self) -> Result<()> {
        self.release_outstanding().map_err(|e| {
            if e.status().contains(CaptureStatus::NEEDS_REINIT) {
                self.latch_reinit();
            }
            e.into()
        })
    }

    fn release_outstanding(&mut self) -> std::result::Result<(), DuplicationError> {
        if matches!(self.state, FrameState::Idle) {
            return Ok(());
        }
        // The texture reference goes before the frame is handed back
        self.state = FrameState::Idle;
        self.duplication.release_frame()
    }

    fn classify_release(&mut self, e: DuplicationError) -> CaptureStatus {
        let status = e.status();
        if status.contains(CaptureStatus::NEEDS_REINIT) {
            warn!("Releasing frame: {}", e);
            self.latch_reinit();
        } else {
            error!("Failed to release frame: {}", e);
        }
        status
    }

    fn classify_acquire(&mut self, e: DuplicationError) -> CaptureStatus {
        let status = e.status();
        match e {
            DuplicationError::Timeout => trace!("Acquire timed out"),
            DuplicationError::AccessLost | DuplicationError::WaitAbandoned => {
                warn!("Duplication needs re-initialization: {}", e);
                self.latch_reinit();
            }
            _ => error!("Failed to acquire frame: {}", e),
        }
        status
    }

    fn latch_reinit(&mut self) {
        self.needs_reinit = true;
        self.state = FrameState::Idle;
    }

    /// Stage cursor changes reported with a frame; true when published
    fn update_cursor(
        &mut self,
        ring: &mut CursorRing,
        info: &FrameInfo,
        poll_pointer: &mut impl FnMut() -> Option<Point>,
    ) -> std::result::Result<bool, CaptureStatus> {
        let snapshot = ring.stage();
        let mut updated = false;

        if info.pointer_shape_size > 0 {
            let buffer = snapshot.shape.payload_mut(info.pointer_shape_size as usize);
            let shape = match self.duplication.pointer_shape(buffer) {
                Ok(shape) => shape,
                Err(e) => {
                    error!("Failed to get the new pointer shape: {}", e);
                    let status = e.status();
                    if status.contains(CaptureStatus::NEEDS_REINIT) {
                        self.latch_reinit();
                    }
                    return Err(status);
                }
            };
            let Some(kind) = CursorType::from_raw(shape.raw_type) else {
                error!("Unsupported pointer shape type {}", shape.raw_type);
                return Err(CaptureStatus::ERROR);
            };

            snapshot.shape.truncate(shape.size);
            snapshot.shape.width = shape.width;
            snapshot.shape.height = shape.height;
            snapshot.shape.pitch = shape.pitch;
            snapshot.shape.kind = kind;
            snapshot.shape.hotspot = shape.hotspot;
            snapshot.has_shape = true;
            self.cursor.hotspot = shape.hotspot;
            updated = true;
            trace!(
                "Pointer shape {:?} {}x{} ({} bytes)",
                kind, shape.width, shape.height, shape.size
            );
        }

        let position = if info.last_mouse_update_time != 0 {
            Some(info.pointer_position)
        } else {
            poll_pointer().map(|p| p - self.cursor.hotspot)
        };
        if let Some(position) = position
            && self.cursor.position != Some(position)
        {
            self.cursor.position = Some(position);
            snapshot.position = position;
            snapshot.has_position = true;
            updated = true;
        }

        if info.last_mouse_update_time != 0 && info.pointer_visible != self.cursor.visible {
            self.cursor.visible = info.pointer_visible;
            updated = true;
        }
        snapshot.visible = self.cursor.visible;

        if updated {
            ring.publish();
        } else {
            ring.discard();
        }
        Ok(updated)
    }
}

impl<D: Duplication> Drop for FrameAcquisition<D> {
    fn drop(&mut self) {
        if let Err(e) = self.release_outstanding() {
            debug!("Releasing outstanding frame on drop: {}", e);
        }
    }
}
