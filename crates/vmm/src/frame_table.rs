//! Global frame bookkeeping.
//!
//! The frame table is the inverted page table of the system: for each physical frame it
//! records which address space and virtual page currently own it, and whether an access
//! in flight has pinned it. It also owns the free-frame pool and the clock cursor used by
//! the evictor.
//!
//! The table itself does no locking. It lives inside the memory manager's global lock
//! together with every address space's page table, so that the evictor always observes a
//! consistent view of frame ownership and swap state.

use alloc::{boxed::Box, collections::VecDeque};

use crate::{AddressSpaceId, FrameNumber, PageNumber};

/// Identifies the virtual page a frame is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    /// The owning address space.
    pub space: AddressSpaceId,
    /// The virtual page within that address space.
    pub page: PageNumber,
}

/// Metadata for one physical frame.
#[derive(Debug, Default, Clone, Copy)]
struct FrameEntry {
    owner: Option<Owner>,
    pinned: bool,
}

/// Frame ownership, pin state, free pool and clock cursor.
pub struct FrameTable {
    frames: Box<[FrameEntry]>,
    free: VecDeque<FrameNumber>,
    pin_count: usize,
    cursor: usize,
}

impl FrameTable {
    /// Creates a table in which every frame is free.
    ///
    /// Frames are handed out lowest first. The clock cursor starts just before frame 0,
    /// so the first scan inspects frame 0 first.
    pub fn new(frame_count: usize) -> Self {
        assert!(frame_count > 0, "frame table needs at least one frame");
        Self {
            frames: alloc::vec![FrameEntry::default(); frame_count].into_boxed_slice(),
            free: (0..frame_count).map(FrameNumber::new).collect(),
            pin_count: 0,
            cursor: frame_count - 1,
        }
    }

    /// Returns the total number of frames.
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of frames in the free pool.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns the number of pinned frames.
    pub fn pinned_count(&self) -> usize {
        self.pin_count
    }

    /// Takes a frame from the free pool.
    ///
    /// The caller must record ownership with [`FrameTable::bind`] before releasing the
    /// global lock.
    pub fn allocate_free(&mut self) -> Option<FrameNumber> {
        self.free.pop_front()
    }

    /// Records that `frame` now backs `page` of `space`, and clears its pin flag.
    ///
    /// # Panics
    /// Panics if the frame is already bound.
    pub fn bind(&mut self, frame: FrameNumber, space: AddressSpaceId, page: PageNumber) {
        let entry = self.entry_mut(frame);
        assert!(entry.owner.is_none(), "{frame:?} is already bound");
        // Unbound frames can never be pinned.
        debug_assert!(!entry.pinned);
        entry.owner = Some(Owner { space, page });
        entry.pinned = false;
    }

    /// Clears the ownership of `frame` and returns it to the free pool.
    ///
    /// # Panics
    /// Panics if the frame is not bound or is still pinned.
    pub fn unbind(&mut self, frame: FrameNumber) {
        let entry = self.entry_mut(frame);
        assert!(entry.owner.is_some(), "{frame:?} is not bound");
        assert!(!entry.pinned, "{frame:?} is pinned");
        *entry = FrameEntry::default();
        self.free.push_back(frame);
    }

    /// Returns the owner of `frame`, or `None` if the frame is unbound.
    pub fn owner(&self, frame: FrameNumber) -> Option<Owner> {
        self.entry(frame).owner
    }

    /// Returns whether `frame` is pinned.
    pub fn is_pinned(&self, frame: FrameNumber) -> bool {
        self.entry(frame).pinned
    }

    /// Pins `frame`, excluding it from victim selection.
    ///
    /// # Panics
    /// Panics if the frame is already pinned or is not bound.
    pub fn pin(&mut self, frame: FrameNumber) {
        let entry = self.entry_mut(frame);
        assert!(entry.owner.is_some(), "cannot pin unbound {frame:?}");
        assert!(!entry.pinned, "{frame:?} is already pinned");
        entry.pinned = true;
        self.pin_count += 1;
    }

    /// Unpins `frame`.
    ///
    /// Waking threads that wait for an unpinned frame is the caller's job, since the
    /// condition variables belong to the memory manager.
    ///
    /// # Panics
    /// Panics if the frame is not pinned.
    pub fn unpin(&mut self, frame: FrameNumber) {
        let entry = self.entry_mut(frame);
        assert!(entry.pinned, "{frame:?} is not pinned");
        entry.pinned = false;
        self.pin_count -= 1;
    }

    /// Returns whether every frame is pinned, in which case no victim exists.
    pub fn all_pinned(&self) -> bool {
        self.pin_count == self.frames.len()
    }

    /// Advances the clock cursor and returns the frame it now points at.
    pub fn advance_cursor(&mut self) -> FrameNumber {
        self.cursor = (self.cursor + 1) % self.frames.len();
        FrameNumber::new(self.cursor)
    }

    fn entry(&self, frame: FrameNumber) -> &FrameEntry {
        self.frames
            .get(frame.as_usize())
            .expect("frame outside frame table")
    }

    fn entry_mut(&mut self, frame: FrameNumber) -> &mut FrameEntry {
        self.frames
            .get_mut(frame.as_usize())
            .expect("frame outside frame table")
    }
}
