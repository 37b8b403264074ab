//! Per-process address spaces.
//!
//! An [`AddressSpace`] is the handle a process holds on its virtual memory. The translation
//! entries themselves live in the [`MemoryManager`], keyed by [`AddressSpaceId`], so the
//! evictor can reach any process's table while faulting on behalf of another.

use alloc::sync::Arc;
use core::fmt;

use log::warn;
use spin::relax::{RelaxStrategy, Spin};

use crate::{
    Fault, FaultHandler, FrameNumber, MemoryManager, PAGE_SIZE, PageNumber, SwapSlot,
    TeardownReport, VirtualAddress, image::Image, swap::SwapDevice,
};

/// Identifies an address space inside the memory manager.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct AddressSpaceId(usize);

impl AddressSpaceId {
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AddressSpaceId({})", self.0)
    }
}

impl fmt::Display for AddressSpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "space {}", self.0)
    }
}

/// Where the contents of a virtual page live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// Never loaded, or loaded and discarded while clean.
    Unloaded,
    /// Resident in a frame.
    Resident(FrameNumber),
    /// Evicted while dirty; the only copy is in swap.
    Swapped(SwapSlot),
}

/// The virtual memory of one process.
///
/// Virtual pages `0..N` hold the image, followed by the stack pages and a single argument
/// page. Pages are loaded on first touch. Dropping the handle releases every frame and swap
/// slot it holds, just like [`AddressSpace::teardown`].
pub struct AddressSpace<D: SwapDevice, R: RelaxStrategy = Spin> {
    id: AddressSpaceId,
    manager: Arc<MemoryManager<D, R>>,
    image: Image,
    page_count: usize,
    torn_down: bool,
}

impl<D: SwapDevice, R: RelaxStrategy> AddressSpace<D, R> {
    pub(crate) fn new(
        id: AddressSpaceId,
        manager: Arc<MemoryManager<D, R>>,
        image: Image,
        page_count: usize,
    ) -> Self {
        Self {
            id,
            manager,
            image,
            page_count,
            torn_down: false,
        }
    }

    pub fn id(&self) -> AddressSpaceId {
        self.id
    }

    /// Returns the number of virtual pages.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Returns the size of the address space in bytes.
    pub fn size(&self) -> usize {
        self.page_count * PAGE_SIZE
    }

    /// Makes the page covering `addr` resident, evicting another page if memory is full.
    ///
    /// Faulting on a page that is already resident does nothing.
    pub fn handle_fault(&self, addr: VirtualAddress) -> Result<(), Fault> {
        self.manager.handle_fault(self.id, &self.image, addr)
    }

    /// Reports where the contents of `page` currently live.
    ///
    /// # Panics
    /// Panics if `page` is outside the address space.
    pub fn residency(&self, page: PageNumber) -> Residency {
        self.manager.residency(self.id, page)
    }

    /// Copies memory starting at `addr` into `buffer`, returning the number of bytes read.
    ///
    /// Reads past the end of the address space are truncated; a read starting outside it
    /// returns 0.
    pub fn read(&self, addr: VirtualAddress, buffer: &mut [u8]) -> usize {
        let length = self.clamp(addr, buffer.len());
        let mut done = 0;
        while done < length {
            let pinned = self.manager.pin(self.id, &self.image, addr + done);
            let chunk = (PAGE_SIZE - pinned.physical.page_offset()).min(length - done);
            self.manager
                .memory()
                .read(pinned.physical, &mut buffer[done..done + chunk]);
            self.manager.unpin(self.id, pinned, false);
            done += chunk;
        }
        done
    }

    /// Copies `data` into memory starting at `addr`, returning the number of bytes written.
    ///
    /// Writing stops at the first read-only page. Writes past the end of the address space
    /// are truncated; a write starting outside it returns 0.
    pub fn write(&self, addr: VirtualAddress, data: &[u8]) -> usize {
        let length = self.clamp(addr, data.len());
        let mut done = 0;
        while done < length {
            let pinned = self.manager.pin(self.id, &self.image, addr + done);
            if pinned.read_only {
                self.manager.unpin(self.id, pinned, false);
                warn!(
                    "{}: write to read-only page {} refused after {done} bytes",
                    self.id, pinned.page
                );
                break;
            }

            let chunk = (PAGE_SIZE - pinned.physical.page_offset()).min(length - done);
            self.manager
                .memory()
                .write(pinned.physical, &data[done..done + chunk]);
            self.manager.unpin(self.id, pinned, true);
            done += chunk;
        }
        done
    }

    /// Releases every frame and swap slot held by this address space.
    pub fn teardown(mut self) -> TeardownReport {
        self.torn_down = true;
        self.manager.release(self.id)
    }

    fn clamp(&self, addr: VirtualAddress, length: usize) -> usize {
        self.size().saturating_sub(addr.as_usize()).min(length)
    }
}

impl<D: SwapDevice, R: RelaxStrategy> FaultHandler for AddressSpace<D, R> {
    fn handle_fault(&self, addr: VirtualAddress) -> Result<(), Fault> {
        AddressSpace::handle_fault(self, addr)
    }
}

impl<D: SwapDevice, R: RelaxStrategy> Drop for AddressSpace<D, R> {
    fn drop(&mut self) {
        if !self.torn_down {
            self.manager.release(self.id);
        }
    }
}

impl<D: SwapDevice, R: RelaxStrategy> fmt::Debug for AddressSpace<D, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.id)
            .field("page_count", &self.page_count)
            .finish_non_exhaustive()
    }
}
