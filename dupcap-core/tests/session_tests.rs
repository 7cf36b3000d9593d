//! Integration tests for the capture session lifecycle and frame paths

mod mocks;

use std::time::Duration;

use dupcap_core::backend::{DuplicationError, Image, ScriptedFrame};
use dupcap_core::encode::{MEMORY_ENCODER_MAGIC, MemoryEncoderSettings};
use dupcap_core::types::{CaptureStatus, FrameDescriptor, FrameType, Point};
use dupcap_core::{CaptureConfig, CaptureError};
use mocks::{config_for, fast_config, frame_buffer, initialized, pattern, push_pixels, session};

#[test]
fn test_raw_800x600_end_to_end() {
    let (mut session, handle) = initialized(800, 600, fast_config());
    assert_eq!(session.frame_type(), FrameType::Raw);
    assert_eq!(session.max_frame_size(), 1_920_000);
    assert_eq!(session.dimensions(), Some((800, 600)));

    let image = pattern(800, 600, 9);
    push_pixels(&handle, image.clone());

    let status = session.capture();
    assert!(status.contains(CaptureStatus::FRAME_READY));
    assert!(!status.is_failure());

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    assert_eq!((frame.width, frame.height), (800, 600));
    assert_eq!(frame.pitch, 3200);
    assert_eq!(frame.stride, 800);
    assert_eq!(frame.len, 1_920_000);
    assert!(frame.data() == image.data());

    // get_frame hands the frame back before copying out
    assert!(!handle.outstanding());
    assert_eq!(handle.releases(), 1);
}

#[test]
fn test_raw_row_padding_matches_tight_copy() {
    let image = pattern(13, 7, 3);

    let (mut tight, tight_handle) = initialized(13, 7, fast_config());
    push_pixels(&tight_handle, image.clone());
    tight.capture();
    let mut tight_buf = frame_buffer(&tight);
    let mut tight_frame = FrameDescriptor::new(&mut tight_buf);
    assert_eq!(tight.get_frame(&mut tight_frame), CaptureStatus::OK);

    let (mut padded, padded_handle) = mocks::session(13, 7, fast_config());
    padded_handle.set_row_padding(12);
    padded.try_initialize().unwrap();
    push_pixels(&padded_handle, image.clone());
    padded.capture();
    let mut padded_buf = frame_buffer(&padded);
    let mut padded_frame = FrameDescriptor::new(&mut padded_buf);
    assert_eq!(padded.get_frame(&mut padded_frame), CaptureStatus::OK);

    assert_eq!(tight_frame.len, padded_frame.len);
    assert_eq!(tight_frame.data(), padded_frame.data());
    assert_eq!(padded_frame.data(), image.data());
}

#[test]
fn test_raw_buffer_too_small() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    push_pixels(&handle, pattern(4, 4, 0));
    session.capture();

    let mut buffer = vec![0u8; 63];
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
    assert_eq!(frame.len, 0);
    assert!(buffer.iter().all(|&b| b == 0));
}

#[test]
fn test_get_frame_without_capture() {
    let (mut session, _handle) = initialized(4, 4, fast_config());
    let mut buffer = vec![0u8; 64];
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
    assert_eq!(frame.len, 0);
}

#[test]
fn test_uninitialized_session() {
    let (mut session, handle) = session(4, 4, fast_config());
    assert!(!session.is_initialized());
    assert_eq!(session.frame_type(), FrameType::Invalid);
    assert_eq!(session.max_frame_size(), 0);
    assert_eq!(session.capture(), CaptureStatus::ERROR);

    let mut buffer = vec![0u8; 64];
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
    assert_eq!(handle.acquires(), 0);
}

#[test]
fn test_timeout_releases_held_frame() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    push_pixels(&handle, pattern(4, 4, 1));
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));
    assert!(handle.outstanding());

    // Nothing queued: the held frame goes back, then the wait times out
    assert_eq!(session.capture(), CaptureStatus::TIMEOUT);
    assert!(!handle.outstanding());
    assert_eq!(handle.acquire_violations(), 0);

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
}

#[test]
fn test_needs_reinit_until_reinitialized() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    handle.push(DuplicationError::AccessLost);

    assert_eq!(session.capture(), CaptureStatus::NEEDS_REINIT);
    let acquires = handle.acquires();

    // Latched: the service is not touched again
    push_pixels(&handle, pattern(4, 4, 2));
    assert_eq!(session.capture(), CaptureStatus::NEEDS_REINIT);
    assert_eq!(handle.pending(), 1);
    assert_eq!(handle.acquires(), acquires);

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);

    assert!(session.initialize());
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
}

#[test]
fn test_wait_abandoned_needs_reinit() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    handle.push(DuplicationError::WaitAbandoned);
    assert_eq!(session.capture(), CaptureStatus::NEEDS_REINIT);
}

#[test]
fn test_release_access_lost_during_get_frame() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    push_pixels(&handle, pattern(4, 4, 3));
    session.capture();
    handle.fail_next_release(DuplicationError::AccessLost);

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::NEEDS_REINIT);
    assert_eq!(frame.len, 0);
    assert_eq!(session.capture(), CaptureStatus::NEEDS_REINIT);
}

#[test]
fn test_unknown_acquire_failure_is_error() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    handle.push(DuplicationError::Failed("device hung".into()));
    assert_eq!(session.capture(), CaptureStatus::ERROR);

    // Not latched; the next capture proceeds
    push_pixels(&handle, pattern(4, 4, 4));
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));
}

#[test]
fn test_initialize_failure_rolls_back() {
    let (mut session, handle) = session(4, 4, fast_config());
    handle.fail_device_creation(true);

    assert!(!session.initialize());
    assert!(!session.is_initialized());
    assert_eq!(session.frame_type(), FrameType::Invalid);
    assert_eq!(handle.live_resources(), (0, 0, 0));
    assert_eq!(handle.closed_outputs(), 1);

    handle.fail_device_creation(false);
    assert!(session.initialize());
}

#[test]
fn test_duplication_retried_once() {
    let (mut session, handle) = session(4, 4, fast_config());
    handle.fail_duplications(1);

    assert!(session.initialize());
    assert_eq!(handle.duplicate_attempts(), 2);
    assert_eq!(handle.live_resources(), (1, 1, 1));
}

#[test]
fn test_duplication_failure_releases_everything() {
    let (mut session, handle) = session(4, 4, fast_config());
    handle.fail_duplications(5);

    let err = session.try_initialize().unwrap_err();
    assert!(matches!(err.root(), CaptureError::Duplication(_)));
    assert_eq!(handle.duplicate_attempts(), 2);
    assert_eq!(handle.live_resources(), (0, 0, 0));
}

#[test]
fn test_detached_output_rejected() {
    let (mut session, handle) = session(4, 4, fast_config());
    handle.set_attached(false);
    let err = session.try_initialize().unwrap_err();
    assert!(matches!(err, CaptureError::OutputNotAttached(_)));
    assert_eq!(handle.live_resources(), (0, 0, 0));
}

#[test]
fn test_missing_output_rejected() {
    let (mut session, _handle) = session(4, 4, CaptureConfig::new(1, 0));
    let err = session.try_initialize().unwrap_err();
    assert!(matches!(
        err,
        CaptureError::OutputNotFound {
            adapter: 1,
            output: 0
        }
    ));
}

#[test]
fn test_invalid_config_rejected() {
    let config = fast_config().with_acquire_timeout(Duration::ZERO);
    let (mut session, handle) = session(4, 4, config);
    assert!(matches!(
        session.try_initialize(),
        Err(CaptureError::Config(_))
    ));
    assert_eq!(handle.live_resources(), (0, 0, 0));
}

#[test]
fn test_gpu_priority_is_best_effort() {
    let (mut session, handle) = session(4, 4, fast_config());
    assert!(session.initialize());
    assert_eq!(handle.gpu_priority(), Some(7));

    session.deinitialize();
    handle.fail_gpu_priority(true);
    assert!(session.initialize());
}

#[test]
fn test_reinitialize_replaces_resources() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    push_pixels(&handle, pattern(4, 4, 5));
    session.capture();
    assert!(handle.outstanding());

    assert!(session.initialize());
    assert!(!handle.outstanding());
    assert_eq!(handle.live_resources(), (1, 1, 1));
}

#[test]
fn test_deinitialize_and_drop_release_everything() {
    let (mut session, handle) = initialized(4, 4, config_for(FrameType::PlanarYuv));
    push_pixels(&handle, pattern(4, 4, 6));
    session.capture();
    assert_eq!(handle.live_resources(), (1, 1, 3));

    session.deinitialize();
    assert!(!handle.outstanding());
    assert_eq!(handle.live_resources(), (0, 0, 0));
    assert_eq!(session.max_frame_size(), 0);

    // Safe to call twice
    session.deinitialize();

    assert!(session.initialize());
    push_pixels(&handle, pattern(4, 4, 7));
    session.capture();
    drop(session);
    assert!(!handle.outstanding());
    assert_eq!(handle.live_resources(), (0, 0, 0));
}

#[test]
fn test_frame_type_from_options() {
    let (session, _handle) = initialized(4, 4, fast_config().with_option("YUV420"));
    assert_eq!(session.frame_type(), FrameType::PlanarYuv);
    assert_eq!(session.max_frame_size(), 64);

    let (session, _handle) = initialized(4, 4, fast_config().with_option("verbose"));
    assert_eq!(session.frame_type(), FrameType::Raw);
}

#[test]
fn test_planar_white_frame() {
    let (mut session, handle) = initialized(4, 4, config_for(FrameType::PlanarYuv));
    push_pixels(&handle, Image::solid(4, 4, [255, 255, 255, 255]));
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    assert_eq!(frame.len, 24);
    assert_eq!(frame.pitch, 4);
    assert_eq!(frame.stride, 4);

    let data = frame.data();
    assert!(data[..16].iter().all(|&y| y == 235));
    assert!(data[16..].iter().all(|&c| c == 128));
    assert!(!handle.outstanding());
}

#[test]
fn test_planar_odd_dimensions() {
    let (mut session, handle) = initialized(5, 3, config_for(FrameType::PlanarYuv));
    push_pixels(&handle, pattern(5, 3, 8));
    session.capture();

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    // 5x3 luma and two 2x1 chroma planes
    assert_eq!(frame.len, 15 + 2 + 2);
}

#[test]
fn test_planar_overflow_is_error() {
    let (mut session, handle) = initialized(4, 4, config_for(FrameType::PlanarYuv));
    push_pixels(&handle, pattern(4, 4, 9));
    session.capture();

    // Room for luma and one chroma plane only
    let mut buffer = vec![0u8; 20];
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
    assert_eq!(frame.len, 0);
    assert!(!handle.outstanding());
}

#[test]
fn test_hardware_video_produces_access_unit() {
    let (mut session, handle) = initialized(4, 4, fast_config().with_option("h264"));
    assert_eq!(session.frame_type(), FrameType::HardwareVideo);

    push_pixels(&handle, Image::solid(4, 4, [0, 0, 0, 255]));
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));

    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    assert_eq!(frame.len, 8 + 24);
    assert_eq!(frame.pitch as usize, frame.len);
    let data = frame.data();
    assert_eq!(&data[..4], &MEMORY_ENCODER_MAGIC);
    assert_eq!(&data[4..8], &0u32.to_le_bytes());
    assert!(data[8..24].iter().all(|&y| y == 16));
    assert!(!handle.outstanding());

    push_pixels(&handle, Image::solid(4, 4, [0, 0, 0, 255]));
    session.capture();
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    assert_eq!(&frame.data()[4..8], &1u32.to_le_bytes());
}

#[test]
fn test_hardware_video_pump_limit() {
    let config = fast_config()
        .with_frame_type(FrameType::HardwareVideo)
        .with_max_encoder_pumps(8);
    let (mut session, handle) = mocks::session(4, 4, config);
    handle.set_encoder_settings(MemoryEncoderSettings {
        latency: 100,
        lookahead: 0,
        fail_after_frames: None,
    });
    session.try_initialize().unwrap();

    push_pixels(&handle, pattern(4, 4, 10));
    session.capture();
    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::TIMEOUT);
    assert_eq!(frame.len, 0);
    assert!(!handle.outstanding());
}

#[test]
fn test_hardware_video_waits_once_for_new_frames() {
    let config = fast_config()
        .with_frame_type(FrameType::HardwareVideo)
        .with_max_encoder_pumps(64);
    let (mut session, handle) = mocks::session(4, 4, config);
    handle.set_encoder_settings(MemoryEncoderSettings {
        lookahead: 5,
        ..Default::default()
    });
    session.try_initialize().unwrap();

    push_pixels(&handle, pattern(4, 4, 13));
    assert!(session.capture().contains(CaptureStatus::FRAME_READY));
    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);
    assert_eq!(&frame.data()[4..8], &0u32.to_le_bytes());

    // One empty acquire, then the last frame fills the lookahead
    let stats = session.stats().snapshot();
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.frames, 1);
    assert!(!handle.outstanding());
}

#[test]
fn test_hardware_video_pulls_frames_into_stats() {
    let config = fast_config().with_frame_type(FrameType::HardwareVideo);
    let (mut session, handle) = mocks::session(4, 4, config);
    handle.set_encoder_settings(MemoryEncoderSettings {
        lookahead: 1,
        ..Default::default()
    });
    session.try_initialize().unwrap();

    push_pixels(&handle, pattern(4, 4, 14));
    push_pixels(&handle, pattern(4, 4, 15));
    session.capture();
    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::OK);

    assert_eq!(handle.pending(), 0);
    assert_eq!(handle.acquires(), 2);
    let stats = session.stats().snapshot();
    assert_eq!(stats.frames, 2);
    assert_eq!(stats.timeouts, 0);
}

#[test]
fn test_hardware_video_encoder_error() {
    let (mut session, handle) = mocks::session(4, 4, config_for(FrameType::HardwareVideo));
    handle.set_encoder_settings(MemoryEncoderSettings {
        latency: 0,
        lookahead: 0,
        fail_after_frames: Some(0),
    });
    session.try_initialize().unwrap();

    push_pixels(&handle, pattern(4, 4, 11));
    session.capture();
    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    assert_eq!(session.get_frame(&mut frame), CaptureStatus::ERROR);
}

#[test]
fn test_hardware_video_requires_encoder() {
    let (mut session, handle) = mocks::session(4, 4, config_for(FrameType::HardwareVideo));
    handle.set_encoder_available(false);
    let err = session.try_initialize().unwrap_err();
    assert!(matches!(err.root(), CaptureError::Unsupported(_)));
    assert_eq!(handle.live_resources(), (0, 0, 0));
}

#[test]
fn test_cursor_reaches_reader() {
    let (mut session, handle) = initialized(64, 64, fast_config());
    let mut reader = session.cursor_reader().unwrap();
    assert!(session.cursor_reader().is_none());

    handle.push(ScriptedFrame::pointer(Point::new(10, 20), true));
    assert_eq!(
        session.capture(),
        CaptureStatus::OK | CaptureStatus::CURSOR_UPDATED
    );

    let mut cursor = Default::default();
    assert!(reader.get_cursor(&mut cursor));
    assert!(cursor.visible);
    assert!(cursor.has_position);
    assert_eq!(cursor.position, Point::new(10, 20));
    reader.free_cursor();

    let stats = session.stats().snapshot();
    assert_eq!(stats.cursor_updates, 1);
    assert_eq!(stats.frames, 0);
}

#[test]
fn test_stats_track_outcomes() {
    let (mut session, handle) = initialized(4, 4, fast_config());
    push_pixels(&handle, pattern(4, 4, 12));
    session.capture();
    let mut buffer = frame_buffer(&session);
    let mut frame = FrameDescriptor::new(&mut buffer);
    session.get_frame(&mut frame);
    session.capture();
    handle.push(DuplicationError::AccessLost);
    session.capture();

    let stats = session.stats().snapshot();
    assert_eq!(stats.frames, 1);
    assert_eq!(stats.timeouts, 1);
    assert_eq!(stats.reinit_signals, 1);
    assert_eq!(stats.bytes_delivered, 64);
}
