//! Clock page-replacement policy.
//!
//! The replacer tracks the frames eligible for eviction as a ring in
//! insertion order, each with a reference bit. A hand sweeps the ring:
//! entries with the bit set get a second chance (the bit is cleared),
//! the first entry found with the bit clear is evicted.

use parking_lot::RwLock;

use super::frame::FrameId;

#[derive(Debug)]
struct ClockEntry {
    frame_id: FrameId,
    referenced: bool,
}

#[derive(Debug)]
struct ClockState {
    entries: Vec<ClockEntry>,
    hand: usize,
}

impl ClockState {
    fn position(&self, frame_id: FrameId) -> Option<usize> {
        self.entries.iter().position(|e| e.frame_id == frame_id)
    }

    /// Runs the clock scan over a non-empty ring and removes the victim.
    /// Afterwards the hand indexes the entry that followed the victim,
    /// possibly one past the end; the caller wraps it.
    fn sweep(&mut self) -> FrameId {
        debug_assert!(!self.entries.is_empty());
        loop {
            if self.entries[self.hand].referenced {
                self.entries[self.hand].referenced = false;
                self.hand = (self.hand + 1) % self.entries.len();
            } else {
                return self.entries.remove(self.hand).frame_id;
            }
        }
    }
}

/// Clock replacer over a fixed set of frame ids.
///
/// All operations are thread-safe behind a shared-exclusive latch;
/// [`ClockReplacer::size`] is the only reader.
pub struct ClockReplacer {
    capacity: usize,
    state: RwLock<ClockState>,
}

impl ClockReplacer {
    /// Creates a replacer able to track up to `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: RwLock::new(ClockState {
                entries: Vec::with_capacity(capacity),
                hand: 0,
            }),
        }
    }

    /// Makes `frame_id` victim-eligible.
    ///
    /// If the frame is already tracked, its reference bit is set in place;
    /// removing and reinserting would change its clock position, which is
    /// exactly what this must not do.
    pub fn unpin(&self, frame_id: FrameId) {
        let mut state = self.state.write();

        if let Some(index) = state.position(frame_id) {
            state.entries[index].referenced = true;
            return;
        }

        if state.entries.len() == self.capacity {
            // Ring is full: evict in place and take over the vacated
            // position, then move the hand past it.
            let _ = state.sweep();
            let index = state.hand.min(state.entries.len());
            state.entries.insert(
                index,
                ClockEntry {
                    frame_id,
                    referenced: true,
                },
            );
            state.hand = (index + 1) % state.entries.len();
        } else {
            state.entries.push(ClockEntry {
                frame_id,
                referenced: true,
            });
        }
    }

    /// Removes `frame_id` from the victim-eligible set; no-op if absent.
    ///
    /// If the hand points at the removed entry it ends up on the entry
    /// that followed it, wrapping at the end, so the next scan resumes
    /// exactly where it would have.
    pub fn pin(&self, frame_id: FrameId) {
        let mut state = self.state.write();

        let Some(index) = state.position(frame_id) else {
            return;
        };
        state.entries.remove(index);
        if index < state.hand {
            state.hand -= 1;
        }
        if state.hand >= state.entries.len() {
            state.hand = 0;
        }
    }

    /// Selects and removes a victim, or `None` if nothing is eligible.
    pub fn victim(&self) -> Option<FrameId> {
        let mut state = self.state.write();
        if state.entries.is_empty() {
            return None;
        }

        let frame_id = state.sweep();
        if state.hand >= state.entries.len() {
            state.hand = 0;
        }
        Some(frame_id)
    }

    /// Number of victim-eligible frames.
    pub fn size(&self) -> usize {
        self.state.read().entries.len()
    }
}

impl std::fmt::Debug for ClockReplacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("ClockReplacer")
            .field("capacity", &self.capacity)
            .field("size", &state.entries.len())
            .field("hand", &state.hand)
            .finish()
    }
}
