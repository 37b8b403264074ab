//! Per-process translation tables.
//!
//! Each address space owns a flat table with one [`TranslationEntry`] per virtual page,
//! plus a map of the pages whose only copy lives in swap. A page is never both resident
//! and in the swap map.

use alloc::{boxed::Box, collections::BTreeMap};

use crate::{FrameNumber, PAGE_SIZE, PageNumber, PhysicalAddress, SwapSlot, VirtualAddress};

/// Status bits of a translation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct EntryFlags(u8);

impl EntryFlags {
    /// The entry maps a resident frame.
    const VALID: u8 = 1 << 0;

    /// Writes to the page are refused.
    const READ_ONLY: u8 = 1 << 1;

    /// The page was referenced since the clock hand last passed it.
    const USED: u8 = 1 << 2;

    /// The frame was modified since it was populated.
    const DIRTY: u8 = 1 << 3;

    /// Creates empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    fn get(self, bit: u8) -> bool {
        (self.0 & bit) != 0
    }

    fn set(&mut self, bit: u8, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }
}

/// Metadata for one virtual page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    page: PageNumber,
    frame: Option<FrameNumber>,
    flags: EntryFlags,
}

impl TranslationEntry {
    /// Creates an invalid, unmapped entry for `page`.
    pub const fn new(page: PageNumber) -> Self {
        Self {
            page,
            frame: None,
            flags: EntryFlags::empty(),
        }
    }

    /// Returns the virtual page this entry describes.
    pub fn page(&self) -> PageNumber {
        self.page
    }

    /// Returns the mapped frame, if the page is resident.
    pub fn frame(&self) -> Option<FrameNumber> {
        self.frame
    }

    pub fn is_valid(&self) -> bool {
        self.flags.get(EntryFlags::VALID)
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.get(EntryFlags::READ_ONLY)
    }

    pub fn is_used(&self) -> bool {
        self.flags.get(EntryFlags::USED)
    }

    pub fn is_dirty(&self) -> bool {
        self.flags.get(EntryFlags::DIRTY)
    }

    pub fn set_used(&mut self, used: bool) {
        self.flags.set(EntryFlags::USED, used);
    }

    pub fn set_dirty(&mut self, dirty: bool) {
        self.flags.set(EntryFlags::DIRTY, dirty);
    }

    /// Maps the entry to a freshly populated frame: valid, used and clean.
    pub fn map(&mut self, frame: FrameNumber, read_only: bool) {
        self.frame = Some(frame);
        self.flags = EntryFlags::empty();
        self.flags.set(EntryFlags::VALID, true);
        self.flags.set(EntryFlags::USED, true);
        self.flags.set(EntryFlags::READ_ONLY, read_only);
    }

    /// Clears the mapping and every status bit.
    pub fn invalidate(&mut self) {
        self.frame = None;
        self.flags = EntryFlags::empty();
    }
}

/// The translation entries and swap map of one address space.
#[derive(Debug)]
pub struct PageTable {
    entries: Box<[TranslationEntry]>,
    swapped: BTreeMap<PageNumber, SwapSlot>,
}

impl PageTable {
    /// Creates a table of `page_count` invalid entries.
    pub fn new(page_count: usize) -> Self {
        Self {
            entries: (0..page_count)
                .map(|page| TranslationEntry::new(PageNumber::new(page)))
                .collect(),
            swapped: BTreeMap::new(),
        }
    }

    /// Returns the number of pages in the address space.
    pub fn page_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the size of the address space in bytes.
    pub fn size(&self) -> usize {
        self.entries.len() * PAGE_SIZE
    }

    /// Returns true if `addr` lies inside the address space.
    pub fn contains(&self, addr: VirtualAddress) -> bool {
        addr.as_usize() < self.size()
    }

    /// # Panics
    /// Panics if the page is outside the table.
    pub fn entry(&self, page: PageNumber) -> &TranslationEntry {
        self.entries
            .get(page.as_usize())
            .expect("page outside address space")
    }

    /// # Panics
    /// Panics if the page is outside the table.
    pub fn entry_mut(&mut self, page: PageNumber) -> &mut TranslationEntry {
        self.entries
            .get_mut(page.as_usize())
            .expect("page outside address space")
    }

    /// Iterates over every entry in page order.
    pub fn entries(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    /// Records that the only copy of `page` now lives in `slot`.
    pub fn record_swapped(&mut self, page: PageNumber, slot: SwapSlot) {
        debug_assert!(!self.entry(page).is_valid(), "resident page recorded in swap");
        let previous = self.swapped.insert(page, slot);
        assert!(previous.is_none(), "{page:?} already has a swap slot");
    }

    /// Removes and returns the swap slot holding `page`, if any.
    pub fn take_swapped(&mut self, page: PageNumber) -> Option<SwapSlot> {
        self.swapped.remove(&page)
    }

    /// Returns the swap slot holding `page`, if any.
    pub fn swapped(&self, page: PageNumber) -> Option<SwapSlot> {
        self.swapped.get(&page).copied()
    }

    /// Returns the number of pages that live only in swap.
    pub fn swapped_count(&self) -> usize {
        self.swapped.len()
    }

    /// Removes every swap mapping, yielding the slots.
    pub fn drain_swapped(&mut self) -> impl Iterator<Item = SwapSlot> + '_ {
        core::mem::take(&mut self.swapped).into_values()
    }
}

/// Translates a virtual address through a valid entry.
///
/// # Panics
/// Panics if `addr` is outside the address space or its page is not resident. Callers
/// must reject out-of-range addresses and fault the page in first.
pub fn translate(table: &PageTable, addr: VirtualAddress) -> PhysicalAddress {
    let entry = valid_entry(table, addr);
    let frame = entry.frame().expect("valid entry without a frame");
    frame.start() + addr.page_offset()
}

/// Returns whether the resident page covering `addr` is read-only.
///
/// # Panics
/// Same contract as [`translate`].
pub fn is_read_only(table: &PageTable, addr: VirtualAddress) -> bool {
    valid_entry(table, addr).is_read_only()
}

fn valid_entry(table: &PageTable, addr: VirtualAddress) -> &TranslationEntry {
    assert!(
        table.contains(addr),
        "{addr:?} is outside an address space of {} bytes",
        table.size()
    );
    let entry = table.entry(PageNumber::from(addr));
    assert!(entry.is_valid(), "{addr:?} translated through an invalid entry");
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_start_invalid() {
        let table = PageTable::new(3);
        assert_eq!(table.page_count(), 3);
        assert_eq!(table.size(), 3 * PAGE_SIZE);
        for (index, entry) in table.entries().enumerate() {
            assert_eq!(entry.page(), PageNumber::new(index));
            assert_eq!(entry.frame(), None);
            assert!(!entry.is_valid());
            assert!(!entry.is_used());
            assert!(!entry.is_dirty());
            assert!(!entry.is_read_only());
        }
    }

    #[test]
    fn map_and_invalidate() {
        let mut entry = TranslationEntry::new(PageNumber::new(2));
        entry.map(FrameNumber::new(5), true);
        entry.set_dirty(true);

        assert!(entry.is_valid());
        assert!(entry.is_used());
        assert!(entry.is_read_only());
        assert!(entry.is_dirty());
        assert_eq!(entry.frame(), Some(FrameNumber::new(5)));

        entry.invalidate();
        assert_eq!(entry, TranslationEntry::new(PageNumber::new(2)));
    }

    #[test]
    fn translates_through_valid_entries() {
        let mut table = PageTable::new(4);
        table.entry_mut(PageNumber::new(2)).map(FrameNumber::new(1), false);

        let addr = PageNumber::new(2).start() + 12;
        assert_eq!(translate(&table, addr), FrameNumber::new(1).start() + 12);
        assert!(!is_read_only(&table, addr));
    }

    #[test]
    #[should_panic(expected = "invalid entry")]
    fn translating_an_invalid_entry_panics() {
        let table = PageTable::new(4);
        translate(&table, VirtualAddress::new(0));
    }

    #[test]
    #[should_panic(expected = "outside an address space")]
    fn translating_out_of_range_panics() {
        let table = PageTable::new(1);
        translate(&table, VirtualAddress::new(PAGE_SIZE));
    }

    #[test]
    fn swap_map_round_trip() {
        let mut table = PageTable::new(4);
        table.record_swapped(PageNumber::new(1), SwapSlot::new(9));
        table.record_swapped(PageNumber::new(3), SwapSlot::new(2));

        assert_eq!(table.swapped(PageNumber::new(1)), Some(SwapSlot::new(9)));
        assert_eq!(table.take_swapped(PageNumber::new(1)), Some(SwapSlot::new(9)));
        assert_eq!(table.take_swapped(PageNumber::new(1)), None);

        let drained: Vec<_> = table.drain_swapped().collect();
        assert_eq!(drained, [SwapSlot::new(2)]);
        assert_eq!(table.swapped_count(), 0);
    }
}
