//! The memory manager.
//!
//! One [`MemoryManager`] owns all global paging state: physical memory, the frame table,
//! the swap store and the page table of every live address space. All of that state sits
//! behind a single [`spin::Mutex`], because eviction reads one process's table while acting
//! on behalf of another and must see frame ownership and swap maps change together.
//!
//! The lock is not held while bytes are copied in or out of a frame during an access.
//! Instead the frame is pinned, which keeps the evictor away from it until the copy is
//! done.

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use log::{debug, info, trace};
use spin::{
    Mutex, MutexGuard,
    relax::{RelaxStrategy, Spin},
};

use crate::{
    AddressSpace, AddressSpaceId, DEFAULT_STACK_PAGES, Fault, FrameNumber, PAGE_SIZE, PageNumber,
    PhysicalAddress, Residency, VirtualAddress,
    evictor::{self, Scan},
    frame_table::FrameTable,
    image::{Image, PageSource},
    page_table::{self, PageTable},
    physical_memory::PhysicalMemory,
    swap::{SwapDevice, SwapStore},
    sync::Condition,
};

/// Sizing of the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Number of physical frames.
    pub frames: usize,
    /// Number of stack pages given to every address space.
    pub stack_pages: usize,
}

impl MemoryConfig {
    /// Creates a configuration with `frames` frames and the default stack size.
    pub const fn new(frames: usize) -> Self {
        Self {
            frames,
            stack_pages: DEFAULT_STACK_PAGES,
        }
    }

    /// Sets the number of stack pages per address space.
    pub const fn with_stack_pages(mut self, stack_pages: usize) -> Self {
        self.stack_pages = stack_pages;
        self
    }
}

/// A snapshot of paging activity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_frames: usize,
    pub free_frames: usize,
    pub pinned_frames: usize,
    /// Slots ever created on the swap device.
    pub swap_extent: usize,
    pub free_slots: usize,
    pub page_faults: u64,
    pub evictions: u64,
    pub swap_writes: u64,
    pub swap_reads: u64,
}

/// Event counters, updated under the global lock.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Counters {
    pub page_faults: u64,
    pub evictions: u64,
    pub swap_writes: u64,
    pub swap_reads: u64,
}

/// Everything guarded by the global lock.
pub(crate) struct KernelState<D> {
    pub frames: FrameTable,
    pub swap: SwapStore<D>,
    /// Page tables of live address spaces; frame owners are resolved through here.
    pub spaces: BTreeMap<AddressSpaceId, PageTable>,
    pub counters: Counters,
}

impl<D> KernelState<D> {
    pub fn new(frames: usize, device: D) -> Self
    where
        D: SwapDevice,
    {
        Self {
            frames: FrameTable::new(frames),
            swap: SwapStore::new(device),
            spaces: BTreeMap::new(),
            counters: Counters::default(),
        }
    }

    /// # Panics
    /// Panics if the address space has been torn down.
    pub fn table_mut(&mut self, space: AddressSpaceId) -> &mut PageTable {
        self.spaces
            .get_mut(&space)
            .expect("address space has been torn down")
    }
}

/// A resident page pinned for an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PinnedPage {
    pub page: PageNumber,
    pub frame: FrameNumber,
    /// Translation of the address the access starts at.
    pub physical: PhysicalAddress,
    pub read_only: bool,
}

/// Frames and swap slots returned when an address space is torn down.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TeardownReport {
    pub frames_released: usize,
    pub slots_released: usize,
}

/// The global demand-paging state of the system.
pub struct MemoryManager<D, R = Spin> {
    config: MemoryConfig,
    memory: PhysicalMemory,
    state: Mutex<KernelState<D>>,
    /// Signalled once per unpin; evictors wait here when every frame is pinned.
    frame_unpinned: Condition<R>,
    /// Signalled to everyone on unpin; accessors wait here for a page another access pinned.
    page_released: Condition<R>,
    next_space: AtomicUsize,
}

impl<D: SwapDevice, R: RelaxStrategy> MemoryManager<D, R> {
    /// Creates a memory manager with `config.frames` free frames, swapping to `device`.
    ///
    /// # Panics
    /// Panics if `config.frames` is zero.
    pub fn new(config: MemoryConfig, device: D) -> Arc<Self> {
        assert!(config.frames > 0, "memory manager needs at least one frame");
        info!(
            "memory manager: {} frames of {} bytes, {} stack pages per process",
            config.frames, PAGE_SIZE, config.stack_pages
        );

        Arc::new(Self {
            config,
            memory: PhysicalMemory::new(config.frames),
            state: Mutex::new(KernelState::new(config.frames, device)),
            frame_unpinned: Condition::new(),
            page_released: Condition::new(),
            next_space: AtomicUsize::new(1),
        })
    }

    /// Returns the configuration this manager was created with.
    pub fn config(&self) -> MemoryConfig {
        self.config
    }

    /// Returns physical memory.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Creates an address space for `image`.
    ///
    /// The space holds the image's pages, then the stack pages, then one argument page.
    /// Every entry starts invalid; nothing is loaded until it is faulted in.
    pub fn create_address_space(self: &Arc<Self>, image: Image) -> AddressSpace<D, R> {
        let id = AddressSpaceId::new(self.next_space.fetch_add(1, Ordering::Relaxed));
        let page_count = image.page_count() + self.config.stack_pages + 1;
        self.state.lock().spaces.insert(id, PageTable::new(page_count));
        debug!("created {id} with {page_count} pages");
        AddressSpace::new(id, Arc::clone(self), image, page_count)
    }

    /// Takes a snapshot of the paging statistics.
    pub fn stats(&self) -> MemoryStats {
        let state = self.state.lock();
        MemoryStats {
            total_frames: state.frames.total_frames(),
            free_frames: state.frames.free_count(),
            pinned_frames: state.frames.pinned_count(),
            swap_extent: state.swap.extent(),
            free_slots: state.swap.free_count(),
            page_faults: state.counters.page_faults,
            evictions: state.counters.evictions,
            swap_writes: state.counters.swap_writes,
            swap_reads: state.counters.swap_reads,
        }
    }

    /// Shuts the manager down, closing and returning the swap device.
    ///
    /// # Panics
    /// Panics if any address space still references the manager.
    pub fn shutdown(this: Arc<Self>) -> D {
        let manager = Arc::into_inner(this).expect("address spaces outlive the memory manager");
        let state = manager.state.into_inner();
        info!(
            "memory manager shut down after {} faults and {} evictions",
            state.counters.page_faults, state.counters.evictions
        );
        state.swap.into_device()
    }

    /// Makes the page covering `addr` resident.
    pub(crate) fn handle_fault(
        &self,
        space: AddressSpaceId,
        image: &Image,
        addr: VirtualAddress,
    ) -> Result<(), Fault> {
        let mut state = self.state.lock();
        let table = state.table_mut(space);
        if !table.contains(addr) {
            return Err(Fault::AddressError {
                address: addr,
                limit: table.size(),
            });
        }

        let (_state, _frame) = self.fault_in(state, space, image, PageNumber::from(addr), false);
        Ok(())
    }

    /// Faults in the page covering `addr` if needed and pins its frame.
    ///
    /// If another access has the page pinned, waits until it is released.
    ///
    /// # Panics
    /// Panics if `addr` is outside the address space.
    pub(crate) fn pin(
        &self,
        space: AddressSpaceId,
        image: &Image,
        addr: VirtualAddress,
    ) -> PinnedPage {
        let page = PageNumber::from(addr);
        let (mut state, frame) = self.fault_in(self.state.lock(), space, image, page, true);

        let table = state.table_mut(space);
        PinnedPage {
            page,
            frame,
            physical: page_table::translate(table, addr),
            read_only: page_table::is_read_only(table, addr),
        }
    }

    /// Releases a page pinned by [`MemoryManager::pin`], recording the reference.
    pub(crate) fn unpin(&self, space: AddressSpaceId, pinned: PinnedPage, written: bool) {
        let mut state = self.state.lock();
        let entry = state.table_mut(space).entry_mut(pinned.page);
        debug_assert_eq!(entry.frame(), Some(pinned.frame));
        entry.set_used(true);
        if written {
            entry.set_dirty(true);
        }

        state.frames.unpin(pinned.frame);
        self.frame_unpinned.wake();
        self.page_released.wake_all();
    }

    /// Reports where the contents of `page` currently live.
    ///
    /// # Panics
    /// Panics if `page` is outside the address space.
    pub(crate) fn residency(&self, space: AddressSpaceId, page: PageNumber) -> Residency {
        let mut state = self.state.lock();
        let table = state.table_mut(space);
        let entry = table.entry(page);
        match entry.frame().filter(|_| entry.is_valid()) {
            Some(frame) => Residency::Resident(frame),
            None => table
                .swapped(page)
                .map_or(Residency::Unloaded, Residency::Swapped),
        }
    }

    /// Releases every frame and swap slot held by `space`.
    pub(crate) fn release(&self, space: AddressSpaceId) -> TeardownReport {
        let mut state = self.state.lock();
        let Some(mut table) = state.spaces.remove(&space) else {
            return TeardownReport::default();
        };

        let mut report = TeardownReport::default();
        for entry in table.entries() {
            let Some(frame) = entry.frame().filter(|_| entry.is_valid()) else {
                continue;
            };
            if state.frames.is_pinned(frame) {
                state.frames.unpin(frame);
            }
            state.frames.unbind(frame);
            report.frames_released += 1;
        }

        for slot in table.drain_swapped() {
            state.swap.free_slot(slot);
            report.slots_released += 1;
        }

        self.frame_unpinned.wake_all();
        self.page_released.wake_all();
        debug!(
            "released {space}: {} frames, {} swap slots",
            report.frames_released, report.slots_released
        );
        report
    }

    /// Makes `page` resident, evicting if the free pool is empty, and optionally pins it.
    ///
    /// Returns the relocked state and the page's frame. The lock is only given up while
    /// waiting, and the page's entry is re-examined after every wait since another thread
    /// may have faulted it in meanwhile.
    fn fault_in<'a>(
        &'a self,
        mut state: MutexGuard<'a, KernelState<D>>,
        space: AddressSpaceId,
        image: &Image,
        page: PageNumber,
        pin: bool,
    ) -> (MutexGuard<'a, KernelState<D>>, FrameNumber) {
        loop {
            let entry = *state.table_mut(space).entry(page);
            if let Some(frame) = entry.frame().filter(|_| entry.is_valid()) {
                if !pin {
                    return (state, frame);
                }
                if state.frames.is_pinned(frame) {
                    trace!("{space} page {page} is pinned by another access, waiting");
                    state = self.page_released.sleep(&self.state, state);
                    continue;
                }
                state.frames.pin(frame);
                return (state, frame);
            }

            if let Some(frame) = state.frames.allocate_free() {
                self.populate(&mut state, space, image, page, frame, pin);
                return (state, frame);
            }

            match evictor::select_victim(&mut state) {
                Scan::Victim(frame) => {
                    let eviction = evictor::evict(&mut state, &self.memory, frame);
                    trace!(
                        "{space} page {page} displaces {} page {} from {:?}",
                        eviction.owner.space, eviction.owner.page, eviction.frame
                    );
                }
                Scan::AllPinned => {
                    trace!("every frame is pinned, waiting for an unpin");
                    state = self.frame_unpinned.sleep(&self.state, state);
                }
            }
        }
    }

    /// Binds `frame` to `page` and fills it from swap, the image, or zeros.
    ///
    /// Pages loaded from the image or zero-filled start clean.
    fn populate(
        &self,
        state: &mut KernelState<D>,
        space: AddressSpaceId,
        image: &Image,
        page: PageNumber,
        frame: FrameNumber,
        pin: bool,
    ) {
        state.frames.bind(frame, space, page);
        if pin {
            state.frames.pin(frame);
        }

        let source = image.source(page);
        let read_only = matches!(source, PageSource::Segment(segment, _) if segment.is_read_only());
        let table = state
            .spaces
            .get_mut(&space)
            .expect("address space has been torn down");
        let mut contents = self.memory.frame(frame);

        let restored = table.take_swapped(page);
        if let Some(slot) = restored {
            state.swap.read_slot(slot, &mut contents);
            state.swap.free_slot(slot);
            state.counters.swap_reads += 1;
            debug!("{space} page {page} -> {frame:?} from {slot:?}");
        } else {
            match source {
                PageSource::Segment(segment, index) => {
                    segment.load_page(index, &mut contents);
                    debug!("{space} page {page} -> {frame:?} from segment page {index}");
                }
                PageSource::Zero => {
                    contents.fill(0);
                    debug!("{space} page {page} -> {frame:?} zero-filled");
                }
            }
        }

        let entry = table.entry_mut(page);
        entry.map(frame, read_only);
        // The slot is gone, so the frame holds the only copy of a restored page.
        entry.set_dirty(restored.is_some());
        state.counters.page_faults += 1;
    }
}
