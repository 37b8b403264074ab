//! Swap space.
//!
//! The swap store divides a backing device into page-sized slots. Slots are handed out
//! from a pool of previously freed slots when possible, otherwise the extent grows by one
//! slot. The extent never shrinks.

use alloc::{collections::VecDeque, vec::Vec};
use core::fmt;

use crate::{PAGE_SIZE, SwapSlot, physical_memory::FrameData};

/// A random-access block device that backs swap space.
///
/// Offsets are in bytes and are always multiples of `PAGE_SIZE`. Implementations return
/// the number of bytes transferred; the swap store treats a short transfer as fatal.
pub trait SwapDevice {
    /// The error reported by the device.
    type Error: fmt::Debug;

    /// Reads `buffer.len()` bytes starting at `offset`.
    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<usize, Self::Error>;

    /// Writes `data` starting at `offset`, growing the device if needed.
    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, Self::Error>;

    /// Releases the device. Called once when the memory manager shuts down.
    fn close(&mut self) {}
}

/// A swap device held entirely in memory.
#[derive(Debug, Default)]
pub struct MemorySwapDevice {
    bytes: Vec<u8>,
}

impl MemorySwapDevice {
    /// Creates an empty device.
    pub const fn new() -> Self {
        Self { bytes: Vec::new() }
    }

    /// Returns the number of bytes ever written to the device.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns true if nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl SwapDevice for MemorySwapDevice {
    type Error = core::convert::Infallible;

    fn read(&mut self, offset: usize, buffer: &mut [u8]) -> Result<usize, Self::Error> {
        let start = offset.min(self.bytes.len());
        let available = (self.bytes.len() - start).min(buffer.len());
        buffer[..available].copy_from_slice(&self.bytes[start..start + available]);
        Ok(available)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<usize, Self::Error> {
        let end = offset + data.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[offset..end].copy_from_slice(data);
        Ok(data.len())
    }
}

/// Slot allocator and page transfer over a [`SwapDevice`].
pub struct SwapStore<D> {
    device: D,
    free: VecDeque<SwapSlot>,
    in_use: Vec<bool>,
}

impl<D: SwapDevice> SwapStore<D> {
    /// Creates an empty store over `device`.
    pub fn new(device: D) -> Self {
        Self {
            device,
            free: VecDeque::new(),
            in_use: Vec::new(),
        }
    }

    /// Returns the high-water mark: the number of slots ever created.
    pub fn extent(&self) -> usize {
        self.in_use.len()
    }

    /// Returns the number of slots in the free pool.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns the number of slots currently holding a page.
    pub fn used_count(&self) -> usize {
        self.extent() - self.free_count()
    }

    /// Allocates a slot, reusing a freed one before growing the extent.
    pub fn allocate_slot(&mut self) -> SwapSlot {
        let slot = match self.free.pop_front() {
            Some(slot) => slot,
            None => {
                self.in_use.push(false);
                SwapSlot::new(self.in_use.len() - 1)
            }
        };
        self.in_use[slot.as_usize()] = true;
        slot
    }

    /// Returns a slot to the free pool.
    ///
    /// # Panics
    /// Panics if the slot was never allocated or is already free.
    pub fn free_slot(&mut self, slot: SwapSlot) {
        let in_use = self
            .in_use
            .get_mut(slot.as_usize())
            .expect("swap slot outside the extent");
        assert!(*in_use, "double free of {slot:?}");
        *in_use = false;
        self.free.push_back(slot);
    }

    /// Reads a whole slot into `frame`.
    ///
    /// # Panics
    /// Panics if the slot is not allocated or the device transfers less than a page.
    pub fn read_slot(&mut self, slot: SwapSlot, frame: &mut FrameData) {
        self.assert_in_use(slot);
        let transferred = self
            .device
            .read(slot.offset(), frame)
            .unwrap_or_else(|err| panic!("swap read of {slot:?} failed: {err:?}"));
        assert_eq!(transferred, PAGE_SIZE, "short swap read of {slot:?}");
    }

    /// Writes `frame` to a whole slot.
    ///
    /// # Panics
    /// Panics if the slot is not allocated or the device transfers less than a page.
    pub fn write_slot(&mut self, slot: SwapSlot, frame: &FrameData) {
        self.assert_in_use(slot);
        let transferred = self
            .device
            .write(slot.offset(), frame)
            .unwrap_or_else(|err| panic!("swap write of {slot:?} failed: {err:?}"));
        assert_eq!(transferred, PAGE_SIZE, "short swap write of {slot:?}");
    }

    /// Closes the device and hands it back.
    pub fn into_device(mut self) -> D {
        self.device.close();
        self.device
    }

    fn assert_in_use(&self, slot: SwapSlot) {
        assert!(
            self.in_use.get(slot.as_usize()).copied().unwrap_or(false),
            "{slot:?} is not allocated"
        );
    }
}
