//! Mock infrastructure for testing
//!
//! Builds sessions on the memory backend and provides test images.

#![allow(dead_code)]

use std::time::Duration;

use dupcap_core::backend::{Image, MemoryBackend, MemoryHandle, ScriptedFrame};
use dupcap_core::types::FrameType;
use dupcap_core::{CaptureConfig, CaptureSession};

/// Config with short waits so empty scripts fail fast
pub fn fast_config() -> CaptureConfig {
    CaptureConfig::default()
        .with_acquire_timeout(Duration::from_millis(1))
        .with_duplicate_retry(2, Duration::ZERO)
}

/// Fast config producing `frame_type`
pub fn config_for(frame_type: FrameType) -> CaptureConfig {
    fast_config().with_frame_type(frame_type)
}

/// Uninitialized session on a `width`x`height` memory output
pub fn session(
    width: u32,
    height: u32,
    config: CaptureConfig,
) -> (CaptureSession<MemoryBackend>, MemoryHandle) {
    let backend = MemoryBackend::new(width, height);
    let handle = backend.handle();
    (CaptureSession::new(backend, config), handle)
}

/// Initialized session; panics if initialization fails
pub fn initialized(
    width: u32,
    height: u32,
    config: CaptureConfig,
) -> (CaptureSession<MemoryBackend>, MemoryHandle) {
    let (mut session, handle) = session(width, height, config);
    session
        .try_initialize()
        .expect("memory session should initialize");
    (session, handle)
}

/// BGRA image where every pixel differs from its neighbours
///
/// # Arguments
/// * `seed` - Varies the pattern between frames
pub fn pattern(width: u32, height: u32, seed: u8) -> Image {
    Image::from_fn(width, height, |x, y| {
        [
            (x as u8).wrapping_add(seed),
            (y as u8).wrapping_mul(3),
            seed ^ ((x + y) as u8),
            255,
        ]
    })
}

/// Queue a frame with new pixels
pub fn push_pixels(handle: &MemoryHandle, image: Image) {
    handle.push(ScriptedFrame::pixels(image));
}

/// Buffer large enough for any frame of the session
pub fn frame_buffer(session: &CaptureSession<MemoryBackend>) -> Vec<u8> {
    vec![0u8; session.max_frame_size()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_dimensions() {
        let image = pattern(7, 3, 1);
        assert_eq!(image.width, 7);
        assert_eq!(image.height, 3);
        assert_eq!(image.data().len(), 7 * 3 * 4);
    }

    #[test]
    fn test_pattern_varies_with_seed() {
        assert_ne!(pattern(4, 4, 0).data(), pattern(4, 4, 1).data());
    }
}
