//! Integration tests for the acquire/release engine

mod mocks;

use std::sync::Arc;
use std::time::Duration;

use dupcap_core::backend::memory::MemoryDuplication;
use dupcap_core::backend::{
    Backend, DuplicationError, MemoryBackend, MemoryHandle, ScriptedFrame, ScriptedShape,
};
use dupcap_core::capture::FrameAcquisition;
use dupcap_core::cursor::{CursorReader, CursorRing, cursor_channel};
use dupcap_core::stats::CaptureStats;
use dupcap_core::types::{CaptureStatus, CursorSnapshot, CursorType, Point};
use dupcap_core::CaptureConfig;
use mocks::{fast_config, pattern};

struct Rig {
    engine: FrameAcquisition<MemoryDuplication>,
    ring: CursorRing,
    reader: CursorReader,
    handle: MemoryHandle,
    stats: Arc<CaptureStats>,
    // Keeps the device alive for the duplication's lifetime
    _device: <MemoryBackend as Backend>::Device,
}

impl Rig {
    fn new(width: u32, height: u32, config: CaptureConfig) -> Self {
        let backend = MemoryBackend::new(width, height);
        let handle = backend.handle();
        let output = backend.open_output(0, 0).unwrap();
        let device = backend.create_device(&output).unwrap();
        let duplication = backend.duplicate_output(&device, &output).unwrap();
        let stats = Arc::new(CaptureStats::new());
        let engine = FrameAcquisition::new(duplication, &config, Arc::clone(&stats));
        let (ring, reader) = cursor_channel();
        Self {
            engine,
            ring,
            reader,
            handle,
            stats,
            _device: device,
        }
    }

    fn capture(&mut self) -> CaptureStatus {
        self.engine.capture(&mut self.ring, || None)
    }

    fn capture_polling(&mut self, pointer: Point) -> CaptureStatus {
        self.engine.capture(&mut self.ring, || Some(pointer))
    }

    fn cursor(&mut self) -> Option<CursorSnapshot> {
        let mut snapshot = CursorSnapshot::default();
        if self.reader.get_cursor(&mut snapshot) {
            self.reader.free_cursor();
            Some(snapshot)
        } else {
            None
        }
    }
}

#[test]
fn test_release_before_acquire() {
    let mut rig = Rig::new(4, 4, fast_config());
    for seed in 0..3 {
        rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, seed)));
    }

    for _ in 0..3 {
        assert!(rig.capture().contains(CaptureStatus::FRAME_READY));
        assert!(rig.engine.is_holding());
    }
    assert_eq!(rig.handle.acquires(), 3);
    assert_eq!(rig.handle.releases(), 2);
    assert_eq!(rig.handle.acquire_violations(), 0);
    assert!(rig.handle.outstanding());

    let handle = rig.handle.clone();
    drop(rig);
    assert!(!handle.outstanding());
    assert_eq!(handle.releases(), 3);
}

#[test]
fn test_spurious_wakes_are_capped() {
    let config = fast_config().with_max_spurious_wakes(2);
    let mut rig = Rig::new(4, 4, config);
    for _ in 0..5 {
        rig.handle.push(ScriptedFrame::spurious());
    }

    assert_eq!(rig.capture(), CaptureStatus::TIMEOUT);
    assert_eq!(rig.handle.acquires(), 3);
    assert_eq!(rig.handle.pending(), 2);
    assert!(!rig.handle.outstanding());
    assert!(!rig.engine.is_holding());
    assert_eq!(rig.stats.snapshot().spurious_wakes, 3);
}

#[test]
fn test_spurious_wakes_skipped_until_pixels() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle.push(ScriptedFrame::spurious());
    rig.handle.push(ScriptedFrame::spurious());
    rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, 1)));

    assert_eq!(
        rig.capture(),
        CaptureStatus::OK | CaptureStatus::FRAME_READY
    );
    assert_eq!(rig.handle.acquires(), 3);
    assert_eq!(rig.handle.acquire_violations(), 0);
}

#[test]
fn test_cursor_only_update() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(3, 4), true));

    let status = rig.capture();
    assert_eq!(status, CaptureStatus::OK | CaptureStatus::CURSOR_UPDATED);
    assert!(!status.contains(CaptureStatus::FRAME_READY));
    assert!(!rig.engine.is_holding());
    assert!(rig.engine.held_texture().is_none());

    let cursor = rig.cursor().unwrap();
    assert_eq!(cursor.position, Point::new(3, 4));
    assert!(cursor.visible);
}

#[test]
fn test_unchanged_pointer_is_spurious() {
    let config = fast_config().with_max_spurious_wakes(0);
    let mut rig = Rig::new(4, 4, config);
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(3, 4), true));
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(3, 4), true));

    assert!(rig.capture().contains(CaptureStatus::CURSOR_UPDATED));
    assert_eq!(rig.capture(), CaptureStatus::TIMEOUT);
}

#[test]
fn test_visibility_change_alone_is_an_update() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(1, 1), true));
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(1, 1), false));

    rig.capture();
    assert!(rig.cursor().unwrap().visible);

    assert!(rig.capture().contains(CaptureStatus::CURSOR_UPDATED));
    let cursor = rig.cursor().unwrap();
    assert!(!cursor.visible);
    assert!(!cursor.has_position);
}

#[test]
fn test_pixels_with_pointer() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle.push(
        ScriptedFrame::pixels(pattern(4, 4, 2)).with_pointer(Point::new(2, 2), true),
    );
    assert_eq!(
        rig.capture(),
        CaptureStatus::OK | CaptureStatus::FRAME_READY | CaptureStatus::CURSOR_UPDATED
    );
}

#[test]
fn test_polled_pointer_subtracts_hotspot() {
    let mut rig = Rig::new(64, 64, fast_config());
    let shape = ScriptedShape::color(8, 8, Point::new(2, 3), 0x7f);
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(0, 0), true).with_shape(shape));
    rig.capture();
    let cursor = rig.cursor().unwrap();
    assert!(cursor.has_shape);
    assert_eq!(cursor.shape.hotspot, Point::new(2, 3));

    // No pointer report with the frame: the OS position is polled
    rig.handle.push(ScriptedFrame::pixels(pattern(64, 64, 3)));
    let status = rig.capture_polling(Point::new(20, 30));
    assert!(status.contains(CaptureStatus::CURSOR_UPDATED));
    let cursor = rig.cursor().unwrap();
    assert_eq!(cursor.position, Point::new(18, 27));
    assert!(!cursor.has_shape);
}

#[test]
fn test_shape_metadata() {
    let mut rig = Rig::new(64, 64, fast_config());
    let shape = ScriptedShape::color(32, 32, Point::new(5, 6), 0xaa);
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(1, 2), true).with_shape(shape));
    rig.capture();

    let cursor = rig.cursor().unwrap();
    assert!(cursor.has_shape);
    assert_eq!(cursor.shape.kind, CursorType::Color);
    assert_eq!((cursor.shape.width, cursor.shape.height), (32, 32));
    assert_eq!(cursor.shape.pitch, 128);
    assert_eq!(cursor.shape.len(), 32 * 32 * 4);
    assert!(cursor.shape.data().iter().all(|&b| b == 0xaa));
}

#[test]
fn test_unknown_shape_type_is_error() {
    let mut rig = Rig::new(16, 16, fast_config());
    let mut shape = ScriptedShape::color(4, 4, Point::default(), 1);
    shape.raw_type = 3;
    rig.handle
        .push(ScriptedFrame::pointer(Point::new(1, 1), true).with_shape(shape));
    assert_eq!(rig.capture(), CaptureStatus::ERROR);
    assert!(rig.cursor().is_none());

    // The failed frame is handed back on the next capture
    rig.handle.push(ScriptedFrame::pixels(pattern(16, 16, 4)));
    assert!(rig.capture().contains(CaptureStatus::FRAME_READY));
    assert_eq!(rig.handle.acquire_violations(), 0);
}

#[test]
fn test_release_failures_classified() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, 5)));
    rig.capture();
    rig.handle.fail_next_release(DuplicationError::InvalidCall);
    assert_eq!(rig.capture(), CaptureStatus::ERROR);
    assert!(!rig.engine.needs_reinit());

    rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, 6)));
    rig.capture();
    rig.handle.fail_next_release(DuplicationError::AccessLost);
    assert_eq!(rig.capture(), CaptureStatus::NEEDS_REINIT);
    assert!(rig.engine.needs_reinit());
}

#[test]
fn test_reinit_latch_skips_service() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.handle.push(DuplicationError::AccessLost);
    rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, 7)));

    assert_eq!(rig.capture(), CaptureStatus::NEEDS_REINIT);
    assert_eq!(rig.capture(), CaptureStatus::NEEDS_REINIT);
    assert_eq!(rig.handle.pending(), 1);
}

#[test]
fn test_explicit_release() {
    let mut rig = Rig::new(4, 4, fast_config());
    rig.engine.release().unwrap();

    rig.handle.push(ScriptedFrame::pixels(pattern(4, 4, 8)));
    rig.capture();
    rig.engine.release().unwrap();
    assert!(!rig.engine.is_holding());
    assert!(!rig.handle.outstanding());
    assert_eq!(rig.handle.releases(), 1);
}

#[test]
fn test_timeout_reported() {
    let mut rig = Rig::new(4, 4, fast_config().with_acquire_timeout(Duration::from_millis(5)));
    assert_eq!(rig.capture(), CaptureStatus::TIMEOUT);
    assert_eq!(rig.handle.acquires(), 0);
}
