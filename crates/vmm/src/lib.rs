#![cfg_attr(not(any(test, feature = "std")), no_std)]

//! # Polaris Virtual Memory Manager (VMM)
//!
//! Demand paging for a multi-process kernel with a small, fixed pool of physical frames.
//! It provides:
//!
//! - Per-process address spaces whose pages are loaded from an executable image, or zeroed,
//!   the first time they are touched.
//! - Global clock page replacement across every process, writing dirty pages to a growable
//!   swap device and reading them back on the next fault.
//! - Pinning, so that a frame being read or written is never reassigned mid-copy.
//!
//! Everything hangs off a [`MemoryManager`]. Enable the `std` feature to run it hosted.

extern crate alloc;

mod address;
mod address_space;
mod evictor;
mod fault;
mod frame_table;
mod image;
mod manager;
mod numbers;
mod page_table;
mod physical_memory;
mod swap;
mod sync;

pub use address::{PhysicalAddress, VirtualAddress};
pub use address_space::{AddressSpace, AddressSpaceId, Residency};
pub use fault::{Exception, Fault, FaultHandler, Resolution, handle_exception};
pub use frame_table::Owner;
pub use image::{Image, LoadError, MemorySegment, Segment};
pub use manager::{MemoryConfig, MemoryManager, MemoryStats, TeardownReport};
pub use numbers::{FrameNumber, PageNumber, SwapSlot};
pub use page_table::{PageTable, TranslationEntry, is_read_only, translate};
pub use physical_memory::{FrameData, PhysicalMemory};
pub use swap::{MemorySwapDevice, SwapDevice, SwapStore};
pub use sync::Condition;

/// Size of a page and of a frame, in bytes.
pub const PAGE_SIZE: usize = 1024;

/// Number of stack pages each address space gets unless configured otherwise.
pub const DEFAULT_STACK_PAGES: usize = 8;
