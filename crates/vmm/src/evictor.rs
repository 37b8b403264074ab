//! Clock page replacement.
//!
//! The evictor runs only when the free pool is empty. It sweeps the whole frame table (not
//! just the faulting process) with a persistent cursor, giving every recently used page one
//! more pass before it becomes a victim. Pinned frames are never selected.

use log::{debug, trace};

use crate::{
    FrameNumber, SwapSlot,
    frame_table::Owner,
    manager::KernelState,
    physical_memory::PhysicalMemory,
    swap::SwapDevice,
};

/// Outcome of a clock scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scan {
    /// An unpinned, not recently used frame.
    Victim(FrameNumber),
    /// Every frame is pinned; the caller must wait for an unpin and scan again.
    AllPinned,
}

/// What an eviction did with its victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Eviction {
    pub frame: FrameNumber,
    pub owner: Owner,
    /// The slot the page was written to, or `None` if it was clean and discarded.
    pub slot: Option<SwapSlot>,
}

/// Advances the clock until it finds a victim.
///
/// The `used` bit of every referenced frame the hand passes over is cleared. Unbound frames
/// and frames whose owner has departed are skipped.
pub(crate) fn select_victim<D>(state: &mut KernelState<D>) -> Scan {
    loop {
        if state.frames.all_pinned() {
            return Scan::AllPinned;
        }

        let frame = state.frames.advance_cursor();
        let Some(owner) = state.frames.owner(frame) else {
            trace!("clock: {frame:?} is unbound");
            continue;
        };
        let Some(table) = state.spaces.get_mut(&owner.space) else {
            trace!("clock: {frame:?} belongs to departed {}", owner.space);
            continue;
        };

        let entry = table.entry_mut(owner.page);
        if !entry.is_valid() {
            continue;
        }
        if entry.is_used() {
            entry.set_used(false);
            continue;
        }
        if state.frames.is_pinned(frame) {
            continue;
        }

        return Scan::Victim(frame);
    }
}

/// Evicts `frame`: writes it to swap if dirty, unbinds it and invalidates its entry.
///
/// On return the frame sits in the free pool.
///
/// # Panics
/// Panics if the frame is unbound, pinned, or owned by an unknown address space.
pub(crate) fn evict<D: SwapDevice>(
    state: &mut KernelState<D>,
    memory: &PhysicalMemory,
    frame: FrameNumber,
) -> Eviction {
    let owner = state.frames.owner(frame).expect("victim frame is not bound");
    let table = state
        .spaces
        .get_mut(&owner.space)
        .expect("victim frame owned by an unknown address space");

    let entry = table.entry_mut(owner.page);
    debug_assert_eq!(entry.frame(), Some(frame));
    let dirty = entry.is_dirty();
    entry.invalidate();

    let slot = if dirty {
        let slot = state.swap.allocate_slot();
        state.swap.write_slot(slot, &memory.frame(frame));
        table.record_swapped(owner.page, slot);
        state.counters.swap_writes += 1;
        Some(slot)
    } else {
        None
    };

    state.frames.unbind(frame);
    state.counters.evictions += 1;

    let eviction = Eviction { frame, owner, slot };
    match eviction.slot {
        Some(slot) => debug!(
            "evicted {} page {} from {frame:?} to {slot:?}",
            owner.space, owner.page
        ),
        None => debug!("evicted clean {} page {} from {frame:?}", owner.space, owner.page),
    }
    eviction
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AddressSpaceId, PAGE_SIZE, PageNumber, page_table::PageTable, swap::MemorySwapDevice,
    };

    const SPACE: AddressSpaceId = AddressSpaceId::new(1);

    /// Maps pages `0..frames` of one address space onto frames `0..frames`.
    fn resident_state(frames: usize) -> (KernelState<MemorySwapDevice>, PhysicalMemory) {
        let mut state = KernelState::new(frames, MemorySwapDevice::new());
        state.spaces.insert(SPACE, PageTable::new(frames * 2));
        for page in 0..frames {
            let frame = state.frames.allocate_free().unwrap();
            let page = PageNumber::new(page);
            state.frames.bind(frame, SPACE, page);
            state.table_mut(SPACE).entry_mut(page).map(frame, false);
        }
        (state, PhysicalMemory::new(frames))
    }

    #[test]
    fn first_sweep_clears_used_bits_and_picks_frame_zero() {
        let (mut state, _) = resident_state(4);

        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(0)));
        assert!(state.table_mut(SPACE).entries().all(|entry| !entry.is_used()));
    }

    #[test]
    fn cursor_persists_between_scans() {
        let (mut state, _) = resident_state(4);

        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(0)));
        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(1)));
        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(2)));
    }

    #[test]
    fn recently_used_frames_get_a_second_chance() {
        let (mut state, _) = resident_state(4);
        for page in [0, 1, 3] {
            state.table_mut(SPACE).entry_mut(PageNumber::new(page)).set_used(false);
        }
        state.table_mut(SPACE).entry_mut(PageNumber::new(0)).set_used(true);

        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(1)));
        assert!(!state.table_mut(SPACE).entry(PageNumber::new(0)).is_used());
        assert!(state.table_mut(SPACE).entry(PageNumber::new(2)).is_used());
    }

    #[test]
    fn never_selects_pinned_frames() {
        let (mut state, _) = resident_state(4);
        for frame in 0..3 {
            state.frames.pin(FrameNumber::new(frame));
        }

        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(3)));
    }

    #[test]
    fn reports_when_every_frame_is_pinned() {
        let (mut state, _) = resident_state(2);
        state.frames.pin(FrameNumber::new(0));
        state.frames.pin(FrameNumber::new(1));

        assert_eq!(select_victim(&mut state), Scan::AllPinned);
    }

    #[test]
    fn skips_frames_of_departed_address_spaces() {
        let (mut state, _) = resident_state(2);
        let other = AddressSpaceId::new(2);
        state.frames.unbind(FrameNumber::new(0));
        state.frames.allocate_free();
        state.frames.bind(FrameNumber::new(0), other, PageNumber::new(0));
        state.table_mut(SPACE).entry_mut(PageNumber::new(1)).set_used(false);

        assert_eq!(select_victim(&mut state), Scan::Victim(FrameNumber::new(1)));
    }

    #[test]
    fn clean_victims_are_discarded() {
        let (mut state, memory) = resident_state(2);

        let eviction = evict(&mut state, &memory, FrameNumber::new(0));

        assert_eq!(eviction.slot, None);
        assert_eq!(eviction.owner.page, PageNumber::new(0));
        assert_eq!(state.swap.extent(), 0);
        assert_eq!(state.frames.free_count(), 1);
        assert_eq!(state.frames.owner(FrameNumber::new(0)), None);
        let entry = *state.table_mut(SPACE).entry(PageNumber::new(0));
        assert!(!entry.is_valid());
        assert_eq!(entry.frame(), None);
        assert_eq!(state.table_mut(SPACE).swapped(PageNumber::new(0)), None);
    }

    #[test]
    fn dirty_victims_are_written_to_swap() {
        let (mut state, memory) = resident_state(2);
        memory.frame(FrameNumber::new(1)).fill(0x5A);
        state.table_mut(SPACE).entry_mut(PageNumber::new(1)).set_dirty(true);

        let eviction = evict(&mut state, &memory, FrameNumber::new(1));

        let slot = eviction.slot.expect("dirty page must be written back");
        assert_eq!(state.table_mut(SPACE).swapped(PageNumber::new(1)), Some(slot));
        assert_eq!(state.counters.swap_writes, 1);
        assert_eq!(state.counters.evictions, 1);

        let mut contents = [0u8; PAGE_SIZE];
        state.swap.read_slot(slot, &mut contents);
        assert!(contents.iter().all(|&b| b == 0x5A));

        let entry = *state.table_mut(SPACE).entry(PageNumber::new(1));
        assert!(!entry.is_dirty());
        assert!(!entry.is_used());
        assert!(!entry.is_read_only());
    }
}
