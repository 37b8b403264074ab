//! Replays a single process faulting in every page over a small frame pool.
//!
//! With pages faulted strictly in order and never touched again, the clock evicts them in
//! the order they were loaded, and only the pages that were written go to swap.

use std::{fmt, sync::Arc};

use spin::relax::RelaxStrategy;
use vmm::{
    Fault, Image, MemoryManager, MemorySegment, PAGE_SIZE, PageNumber, Residency, Segment,
    SwapDevice, SwapSlot,
};

/// Number of pages in the scenario's image.
pub const IMAGE_PAGES: usize = 6;

/// Pages written right after they are faulted in.
const DIRTY_PAGES: [usize; 2] = [1, 3];

/// A page observed leaving memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub page: PageNumber,
    /// Where the page was written back to, if it was dirty.
    pub slot: Option<SwapSlot>,
}

#[derive(Debug, Default)]
pub struct ScenarioReport {
    pub evicted: Vec<Evicted>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioError {
    Fault(Fault),
    /// Pages left memory out of load order.
    OutOfOrder {
        position: usize,
        page: PageNumber,
    },
    /// A page was written to swap although clean, or discarded although dirty.
    WriteBack { page: PageNumber, dirty: bool },
    /// A page read back different contents than were written.
    Corrupted { page: PageNumber },
}

impl fmt::Display for ScenarioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioError::Fault(fault) => write!(f, "fault: {fault}"),
            ScenarioError::OutOfOrder { position, page } => {
                write!(f, "eviction {position} took page {page} out of load order")
            }
            ScenarioError::WriteBack { page, dirty: true } => {
                write!(f, "dirty page {page} was discarded")
            }
            ScenarioError::WriteBack { page, dirty: false } => {
                write!(f, "clean page {page} was written to swap")
            }
            ScenarioError::Corrupted { page } => write!(f, "page {page} lost its contents"),
        }
    }
}

impl std::error::Error for ScenarioError {}

impl From<Fault> for ScenarioError {
    fn from(fault: Fault) -> Self {
        ScenarioError::Fault(fault)
    }
}

/// An image whose page `n` is filled with the byte `n`.
fn image() -> Image {
    let bytes = (0..IMAGE_PAGES)
        .flat_map(|page| std::iter::repeat_n(page as u8, PAGE_SIZE))
        .collect();
    let segment: Box<dyn Segment> = Box::new(MemorySegment::new(PageNumber::new(0), bytes, false));
    Image::new(vec![segment]).expect("a single segment starting at page 0 is contiguous")
}

fn marker(page: usize) -> u8 {
    0xD0 | page as u8
}

/// Faults in every page once, writing the dirty pages, and checks each eviction.
pub fn run<D: SwapDevice, R: RelaxStrategy>(
    manager: &Arc<MemoryManager<D, R>>,
) -> Result<ScenarioReport, ScenarioError> {
    let space = manager.create_address_space(image());
    let mut report = ScenarioReport::default();
    println!(
        "{} pages over {} frames",
        space.page_count(),
        manager.config().frames
    );

    for page in 0..space.page_count() {
        let addr = PageNumber::new(page).start();
        space.handle_fault(addr)?;
        if DIRTY_PAGES.contains(&page) {
            space.write(addr, &[marker(page)]);
        }
        println!("fault  page {page}");

        let already = report.evicted.len();
        for earlier in already..page {
            let earlier = PageNumber::new(earlier);
            let slot = match space.residency(earlier) {
                Residency::Resident(_) => continue,
                Residency::Swapped(slot) => Some(slot),
                Residency::Unloaded => None,
            };
            match slot {
                Some(slot) => println!("evict  page {earlier} -> {slot:?}"),
                None => println!("evict  page {earlier} (clean)"),
            }
            report.evicted.push(Evicted {
                page: earlier,
                slot,
            });
        }
    }

    for (position, evicted) in report.evicted.iter().enumerate() {
        if evicted.page != PageNumber::new(position) {
            return Err(ScenarioError::OutOfOrder {
                position,
                page: evicted.page,
            });
        }
        let dirty = DIRTY_PAGES.contains(&position);
        if evicted.slot.is_some() != dirty {
            return Err(ScenarioError::WriteBack {
                page: evicted.page,
                dirty,
            });
        }
    }

    for page in DIRTY_PAGES {
        let mut byte = [0u8];
        space.read(PageNumber::new(page).start(), &mut byte);
        if byte != [marker(page)] {
            return Err(ScenarioError::Corrupted {
                page: PageNumber::new(page),
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spin::relax::Yield;
    use vmm::{MemoryConfig, MemorySwapDevice};

    fn manager(frames: usize) -> Arc<MemoryManager<MemorySwapDevice, Yield>> {
        MemoryManager::new(
            MemoryConfig::new(frames).with_stack_pages(1),
            MemorySwapDevice::new(),
        )
    }

    #[test]
    fn four_frames_evict_the_first_four_pages() {
        let manager = manager(4);
        let report = run(&manager).unwrap();

        let pages: Vec<_> = report.evicted.iter().map(|e| e.page.as_usize()).collect();
        assert_eq!(pages, [0, 1, 2, 3]);
        assert_eq!(report.evicted[0].slot, None);
        assert_eq!(report.evicted[1].slot, Some(SwapSlot::new(0)));
        assert_eq!(report.evicted[2].slot, None);
        assert_eq!(report.evicted[3].slot, Some(SwapSlot::new(1)));
    }

    #[test]
    fn enough_frames_means_no_evictions() {
        let manager = manager(8);
        let report = run(&manager).unwrap();
        assert!(report.evicted.is_empty());
        assert_eq!(manager.stats().evictions, 0);
    }

    #[test]
    fn leaves_no_frames_behind() {
        let manager = manager(3);
        run(&manager).unwrap();

        let stats = manager.stats();
        assert_eq!(stats.free_frames, stats.total_frames);
        assert_eq!(stats.free_slots, stats.swap_extent);
    }
}
