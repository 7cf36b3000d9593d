//! Lock-free cursor hand-off between the capture thread and a consumer
//!
//! Three snapshot slots rotate between the writer, the consumer and a
//! shared "published" position. The writer fills its private slot and swaps
//! it into the published position; the consumer swaps its own slot for the
//! published one when it is fresh. Neither side ever blocks and neither side
//! touches a slot the other owns.
//!
//! If the consumer falls behind, the writer folds the unconsumed changes of
//! the published slot into the next snapshot, so the consumer always sees
//! the latest position and shape with every change flag that was raised
//! since its last read. The fold is only kept if the publication it came
//! from is still unread when the new one replaces it.
//!
//! `reset` frees the shape buffers of the two slots the writer can reach and
//! bumps a generation counter; the consumer frees its own slot's buffer the
//! next time it looks for a snapshot.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, trace, warn};

use crate::types::CursorSnapshot;

const INDEX_MASK: usize = 0b011;
const FRESH: usize = 0b100;

struct Slots {
    slots: [UnsafeCell<CursorSnapshot>; 3],
    /// Index of the published slot, tagged with FRESH until consumed
    published: AtomicUsize,
    /// Bumped by every `reset`
    generation: AtomicU64,
}

// SAFETY: each slot is owned by exactly one of writer, consumer or the
// published position at any time. Ownership moves only through atomic swaps
// on `published`, which order every write before the hand-off. The published
// slot is only ever read.
unsafe impl Sync for Slots {}

impl Slots {
    fn slot(&self, index: usize) -> *mut CursorSnapshot {
        self.slots[index & INDEX_MASK].get()
    }

    #[cfg(test)]
    fn shape_capacities(&self) -> [usize; 3] {
        // SAFETY: test-only, called while neither side is mid-operation.
        std::array::from_fn(|i| unsafe { (*self.slots[i].get()).shape.capacity() })
    }
}

/// Create a connected writer and consumer pair
pub fn cursor_channel() -> (CursorRing, CursorReader) {
    let slots = Arc::new(Slots {
        slots: Default::default(),
        published: AtomicUsize::new(1),
        generation: AtomicU64::new(0),
    });
    let ring = CursorRing {
        slots: Arc::clone(&slots),
        write: 0,
    };
    let reader = CursorReader {
        slots,
        read: 2,
        held: false,
        taken_in: 0,
    };
    (ring, reader)
}

/// Writer side, owned by the capture thread
pub struct CursorRing {
    slots: Arc<Slots>,
    write: usize,
}

impl CursorRing {
    /// Begin an update and return the writer's snapshot with change flags cleared
    pub fn stage(&mut self) -> &mut CursorSnapshot {
        // SAFETY: `write` is owned by this writer.
        let slot = unsafe { &mut *self.slots.slot(self.write) };
        slot.clear_changes();
        slot
    }

    /// Make the staged snapshot visible to the consumer
    ///
    /// Changes of a publication the consumer has not taken yet are carried
    /// into this one. If the consumer takes it while the fold is in progress,
    /// the fold is undone so no change is delivered twice.
    pub fn publish(&mut self) {
        // SAFETY: `write` is owned by this writer.
        let slot = unsafe { &mut *self.slots.slot(self.write) };
        let own = (slot.has_position, slot.has_shape);

        let mut current = self.slots.published.load(Ordering::Acquire);
        loop {
            if current & FRESH != 0 {
                // SAFETY: a fresh published slot is only read, by either side.
                let pending = unsafe { &*self.slots.slot(current) };
                slot.fold_pending(pending);
                trace!("Carrying unconsumed cursor changes forward");
            } else {
                (slot.has_position, slot.has_shape) = own;
            }

            match self.slots.published.compare_exchange(
                current,
                self.write | FRESH,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => {
                    self.write = previous & INDEX_MASK;
                    return;
                }
                // Only the consumer moves `published`, and only by taking it
                Err(actual) => current = actual,
            }
        }
    }

    /// End an update without publishing it
    pub fn discard(&mut self) {
        // SAFETY: `write` is owned by this writer.
        let slot = unsafe { &mut *self.slots.slot(self.write) };
        slot.clear_changes();
    }

    /// Whether a published snapshot is waiting for the consumer
    pub fn has_pending(&self) -> bool {
        self.slots.published.load(Ordering::Acquire) & FRESH != 0
    }

    /// Shape buffer capacity of each slot
    #[cfg(test)]
    pub(crate) fn shape_capacities(&self) -> [usize; 3] {
        self.slots.shape_capacities()
    }

    /// Withdraw any unconsumed snapshot and free the shape buffers
    ///
    /// The writer's slot is freed, then traded for the published one, which
    /// is freed too. The consumer frees its own slot on its next
    /// `get_cursor` or `free_cursor`.
    pub fn reset(&mut self) {
        self.clear_write_slot();
        let previous = self.slots.published.swap(self.write, Ordering::AcqRel);
        if previous & FRESH != 0 {
            debug!("Withdrew unconsumed cursor snapshot");
        }
        self.write = previous & INDEX_MASK;
        self.clear_write_slot();
        self.slots.generation.fetch_add(1, Ordering::Release);
    }

    fn clear_write_slot(&mut self) {
        // SAFETY: `write` is owned by this writer.
        let slot = unsafe { &mut *self.slots.slot(self.write) };
        slot.clear_changes();
        slot.visible = false;
        slot.shape.release();
    }
}

impl std::fmt::Debug for CursorRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorRing")
            .field("write", &self.write)
            .field("pending", &self.has_pending())
            .finish()
    }
}

/// Consumer side, may live on any thread
pub struct CursorReader {
    slots: Arc<Slots>,
    read: usize,
    held: bool,
    /// Reset generation observed when `read` was taken
    taken_in: u64,
}

impl CursorReader {
    /// Copy the latest cursor snapshot into `out`
    ///
    /// Returns `false` when nothing new was published since the last
    /// `free_cursor`. While a snapshot is held, the same snapshot is copied
    /// again.
    pub fn get_cursor(&mut self, out: &mut CursorSnapshot) -> bool {
        if !self.held {
            self.drop_stale_shape();
            if self.slots.published.load(Ordering::Acquire) & FRESH == 0 {
                return false;
            }
            let previous = self.slots.published.swap(self.read, Ordering::AcqRel);
            self.read = previous & INDEX_MASK;
            self.taken_in = self.slots.generation.load(Ordering::Acquire);
            if previous & FRESH == 0 {
                // Withdrawn between the check and the swap
                return false;
            }
            self.held = true;
        }

        // SAFETY: `read` is owned by this consumer.
        let slot = unsafe { &*self.slots.slot(self.read) };
        out.copy_from(slot);
        true
    }

    /// Release the held snapshot so the next `get_cursor` can fetch a new one
    pub fn free_cursor(&mut self) {
        if !self.held {
            warn!("free_cursor called without a held cursor snapshot");
            return;
        }
        self.held = false;
        self.drop_stale_shape();
    }

    /// Free the shape buffer of a slot taken before the last `reset`
    ///
    /// A reset that happened after the slot was taken also happened after
    /// the writer's last read of it.
    fn drop_stale_shape(&mut self) {
        let generation = self.slots.generation.load(Ordering::Acquire);
        if generation != self.taken_in {
            // SAFETY: `read` is owned by this consumer and not held.
            let slot = unsafe { &mut *self.slots.slot(self.read) };
            slot.shape.release();
            self.taken_in = generation;
        }
    }

    /// Whether a snapshot is currently held
    pub fn is_holding(&self) -> bool {
        self.held
    }
}

impl std::fmt::Debug for CursorReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CursorReader")
            .field("read", &self.read)
            .field("held", &self.held)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    #[test]
    fn test_nothing_published() {
        let (_ring, mut reader) = cursor_channel();
        let mut out = CursorSnapshot::default();
        assert!(!reader.get_cursor(&mut out));
    }

    #[test]
    fn test_latest_position_wins() {
        let (mut ring, mut reader) = cursor_channel();
        for x in 0..5 {
            let slot = ring.stage();
            slot.has_position = true;
            slot.position = Point::new(x, x * 2);
            slot.visible = true;
            ring.publish();
        }

        let mut out = CursorSnapshot::default();
        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.position, Point::new(4, 8));
        assert!(out.has_position);
        reader.free_cursor();
        assert!(!reader.get_cursor(&mut out));
    }

    #[test]
    fn test_shape_change_survives_later_moves() {
        let (mut ring, mut reader) = cursor_channel();
        let slot = ring.stage();
        slot.has_shape = true;
        slot.shape.set_data(&[7u8; 64]);
        slot.shape.width = 4;
        ring.publish();

        let slot = ring.stage();
        slot.has_position = true;
        slot.position = Point::new(10, 10);
        ring.publish();

        let mut out = CursorSnapshot::default();
        assert!(reader.get_cursor(&mut out));
        assert!(out.has_shape);
        assert!(out.has_position);
        assert_eq!(out.shape.data(), &[7u8; 64][..]);
    }

    #[test]
    fn test_held_snapshot_is_stable() {
        let (mut ring, mut reader) = cursor_channel();
        ring.stage().position = Point::new(1, 1);
        ring.publish();

        let mut out = CursorSnapshot::default();
        assert!(reader.get_cursor(&mut out));

        ring.stage().position = Point::new(2, 2);
        ring.publish();

        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.position, Point::new(1, 1));

        reader.free_cursor();
        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.position, Point::new(2, 2));
    }

    fn publish_shape(ring: &mut CursorRing, size: usize, fill: u8) {
        let slot = ring.stage();
        slot.has_shape = true;
        slot.shape.set_data(&vec![fill; size]);
        ring.publish();
    }

    #[test]
    fn test_consumed_changes_not_carried_forward() {
        let (mut ring, mut reader) = cursor_channel();
        publish_shape(&mut ring, 64, 1);

        // The consumer takes the shape while the next update is being staged
        let slot = ring.stage();
        let mut out = CursorSnapshot::default();
        assert!(reader.get_cursor(&mut out));
        assert!(out.has_shape);
        reader.free_cursor();

        slot.has_position = true;
        slot.position = Point::new(3, 3);
        ring.publish();

        assert!(reader.get_cursor(&mut out));
        assert!(out.has_position);
        assert!(!out.has_shape, "shape was already delivered");
        reader.free_cursor();
        assert!(!reader.get_cursor(&mut out));
    }

    #[test]
    fn test_own_changes_win_over_pending() {
        let (mut ring, mut reader) = cursor_channel();
        publish_shape(&mut ring, 16, 1);
        publish_shape(&mut ring, 32, 2);

        let mut out = CursorSnapshot::default();
        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.shape.data(), &[2u8; 32][..]);
    }

    #[test]
    fn test_reset_frees_every_shape_buffer() {
        let (mut ring, mut reader) = cursor_channel();
        let mut out = CursorSnapshot::default();

        publish_shape(&mut ring, 16 * 1024, 1);
        assert!(reader.get_cursor(&mut out));
        reader.free_cursor();
        publish_shape(&mut ring, 16 * 1024, 2);
        assert!(ring.shape_capacities().iter().filter(|&&c| c > 0).count() >= 2);

        ring.reset();
        assert!(!reader.get_cursor(&mut out));
        assert_eq!(ring.shape_capacities(), [0, 0, 0]);
    }

    #[test]
    fn test_held_snapshot_freed_after_reset() {
        let (mut ring, mut reader) = cursor_channel();
        let mut out = CursorSnapshot::default();

        publish_shape(&mut ring, 4096, 1);
        assert!(reader.get_cursor(&mut out));
        ring.reset();

        // Still held: the snapshot keeps repeating
        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.shape.len(), 4096);

        reader.free_cursor();
        assert_eq!(ring.shape_capacities(), [0, 0, 0]);

        publish_shape(&mut ring, 8, 3);
        assert!(reader.get_cursor(&mut out));
        assert_eq!(out.shape.data(), &[3u8; 8][..]);
    }

    #[test]
    fn test_reset_withdraws_pending() {
        let (mut ring, mut reader) = cursor_channel();
        ring.stage().has_position = true;
        ring.publish();
        ring.reset();

        let mut out = CursorSnapshot::default();
        assert!(!reader.get_cursor(&mut out));
    }
}
