//! Emulated physical memory.
//!
//! The frame pool is a flat array of `PAGE_SIZE` frames. Each frame carries its own
//! lock so that a pinned access can copy bytes without holding the global memory
//! manager lock.

use alloc::boxed::Box;
use spin::{Mutex, MutexGuard};

use crate::{FrameNumber, PAGE_SIZE, PhysicalAddress};

/// Contents of a single frame.
pub type FrameData = [u8; PAGE_SIZE];

/// Physical memory backing every frame managed by the memory manager.
pub struct PhysicalMemory {
    frames: Box<[Mutex<FrameData>]>,
}

impl PhysicalMemory {
    /// Creates zero-filled physical memory with `frame_count` frames.
    pub fn new(frame_count: usize) -> Self {
        Self {
            frames: (0..frame_count)
                .map(|_| Mutex::new([0u8; PAGE_SIZE]))
                .collect(),
        }
    }

    /// Returns the number of frames.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Returns the size of physical memory in bytes.
    pub fn size(&self) -> usize {
        self.frames.len() * PAGE_SIZE
    }

    /// Locks the contents of a frame.
    ///
    /// # Panics
    /// Panics if the frame is outside physical memory.
    pub fn frame(&self, frame: FrameNumber) -> MutexGuard<'_, FrameData> {
        self.frames
            .get(frame.as_usize())
            .expect("frame outside physical memory")
            .lock()
    }

    /// Copies bytes starting at `addr` into `buffer`.
    ///
    /// # Panics
    /// Panics if the range crosses a frame boundary or leaves physical memory.
    pub fn read(&self, addr: PhysicalAddress, buffer: &mut [u8]) {
        let (frame, range) = Self::split(addr, buffer.len());
        buffer.copy_from_slice(&self.frame(frame)[range]);
    }

    /// Copies `data` into physical memory starting at `addr`.
    ///
    /// # Panics
    /// Panics if the range crosses a frame boundary or leaves physical memory.
    pub fn write(&self, addr: PhysicalAddress, data: &[u8]) {
        let (frame, range) = Self::split(addr, data.len());
        self.frame(frame)[range].copy_from_slice(data);
    }

    fn split(addr: PhysicalAddress, len: usize) -> (FrameNumber, core::ops::Range<usize>) {
        let offset = addr.page_offset();
        assert!(
            offset + len <= PAGE_SIZE,
            "physical access must not cross a frame boundary"
        );
        (FrameNumber::from(addr), offset..offset + len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_zeroed() {
        let memory = PhysicalMemory::new(2);
        assert_eq!(memory.frame_count(), 2);
        assert_eq!(memory.size(), 2 * PAGE_SIZE);
        assert!(memory.frame(FrameNumber::new(1)).iter().all(|&b| b == 0));
    }

    #[test]
    fn reads_back_writes() {
        let memory = PhysicalMemory::new(2);
        let addr = FrameNumber::new(1).start() + 10;
        memory.write(addr, b"polaris");

        let mut buffer = [0u8; 7];
        memory.read(addr, &mut buffer);
        assert_eq!(&buffer, b"polaris");
        assert_eq!(memory.frame(FrameNumber::new(1))[10], b'p');
        assert_eq!(memory.frame(FrameNumber::new(0))[10], 0);
    }

    #[test]
    #[should_panic(expected = "frame boundary")]
    fn rejects_cross_frame_access() {
        let memory = PhysicalMemory::new(2);
        memory.write(PhysicalAddress::new(PAGE_SIZE - 1), &[1, 2]);
    }
}
