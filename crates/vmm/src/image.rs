//! Executable images.
//!
//! An image is an ordered list of loadable segments that together cover virtual pages
//! `0..N` without gaps. Segment contents are copied into frames one page at a time when
//! the page is first faulted in.

use alloc::{boxed::Box, vec::Vec};
use core::fmt;

use crate::{PAGE_SIZE, PageNumber, physical_memory::FrameData};

/// A loadable segment of an executable.
///
/// Implement this trait on the executable format's section type so the memory manager
/// can fill frames on demand.
pub trait Segment: Send + Sync {
    /// Returns the first virtual page covered by this segment.
    fn first_page(&self) -> PageNumber;

    /// Returns the number of pages in this segment.
    fn page_count(&self) -> usize;

    /// Returns whether the segment is mapped read-only.
    fn is_read_only(&self) -> bool;

    /// Fills `frame` with page `index` (relative to the segment start).
    fn load_page(&self, index: usize, frame: &mut FrameData);
}

/// A segment whose contents are held in memory.
///
/// Contents shorter than the segment are zero-padded.
#[derive(Debug, Clone)]
pub struct MemorySegment {
    first_page: PageNumber,
    page_count: usize,
    read_only: bool,
    bytes: Vec<u8>,
}

impl MemorySegment {
    /// Creates a segment starting at `first_page` that spans enough pages for `bytes`.
    pub fn new(first_page: PageNumber, bytes: Vec<u8>, read_only: bool) -> Self {
        let page_count = bytes.len().div_ceil(PAGE_SIZE);
        Self {
            first_page,
            page_count,
            read_only,
            bytes,
        }
    }

    /// Creates a zero-filled segment of `page_count` pages.
    pub fn zeroed(first_page: PageNumber, page_count: usize, read_only: bool) -> Self {
        Self {
            first_page,
            page_count,
            read_only,
            bytes: Vec::new(),
        }
    }
}

impl Segment for MemorySegment {
    fn first_page(&self) -> PageNumber {
        self.first_page
    }

    fn page_count(&self) -> usize {
        self.page_count
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn load_page(&self, index: usize, frame: &mut FrameData) {
        assert!(index < self.page_count, "page {index} outside segment");
        let start = (index * PAGE_SIZE).min(self.bytes.len());
        let end = ((index + 1) * PAGE_SIZE).min(self.bytes.len());
        let source = &self.bytes[start..end];
        frame[..source.len()].copy_from_slice(source);
        frame[source.len()..].fill(0);
    }
}

/// Errors that can occur when assembling an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// A segment does not start where the previous one ended.
    Fragmented {
        /// The page the segment was expected to start at.
        expected: PageNumber,
        /// The page it actually starts at.
        found: PageNumber,
    },
    /// A segment covers no pages.
    Empty {
        /// The page the segment starts at.
        first_page: PageNumber,
    },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Fragmented { expected, found } => write!(
                f,
                "segment starts at page {found}, expected page {expected}"
            ),
            LoadError::Empty { first_page } => {
                write!(f, "segment at page {first_page} covers no pages")
            }
        }
    }
}

impl core::error::Error for LoadError {}

/// Where the initial contents of a page come from.
pub(crate) enum PageSource<'a> {
    /// Page `index` of a segment.
    Segment(&'a dyn Segment, usize),
    /// Stack and argument pages start out zeroed.
    Zero,
}

/// The ordered, contiguous segments of an executable.
pub struct Image {
    segments: Vec<Box<dyn Segment>>,
    page_count: usize,
}

impl Image {
    /// Assembles an image, checking that the segments cover pages `0..N` in order and that
    /// none of them is empty.
    pub fn new(segments: Vec<Box<dyn Segment>>) -> Result<Self, LoadError> {
        let mut page_count = 0;
        for segment in &segments {
            let expected = PageNumber::new(page_count);
            if segment.first_page() != expected {
                return Err(LoadError::Fragmented {
                    expected,
                    found: segment.first_page(),
                });
            }
            if segment.page_count() == 0 {
                return Err(LoadError::Empty {
                    first_page: expected,
                });
            }
            page_count += segment.page_count();
        }

        Ok(Self {
            segments,
            page_count,
        })
    }

    /// Creates an image with no segments.
    pub fn empty() -> Self {
        Self {
            segments: Vec::new(),
            page_count: 0,
        }
    }

    /// Returns the number of pages covered by segments.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Returns the segments in page order.
    pub fn segments(&self) -> impl Iterator<Item = &dyn Segment> {
        self.segments.iter().map(|segment| segment.as_ref())
    }

    /// Determines where the initial contents of `page` come from.
    pub(crate) fn source(&self, page: PageNumber) -> PageSource<'_> {
        if page.as_usize() >= self.page_count {
            return PageSource::Zero;
        }

        self.segments()
            .find(|segment| {
                page.as_usize() < segment.first_page().as_usize() + segment.page_count()
            })
            .map(|segment| PageSource::Segment(segment, page - segment.first_page()))
            .unwrap_or(PageSource::Zero)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn segment(first: usize, pages: usize, read_only: bool) -> Box<dyn Segment> {
        Box::new(MemorySegment::zeroed(PageNumber::new(first), pages, read_only))
    }

    #[test]
    fn counts_pages_across_segments() {
        let image = Image::new(vec![segment(0, 2, true), segment(2, 3, false)]).unwrap();
        assert_eq!(image.page_count(), 5);
        assert_eq!(image.segments().count(), 2);
    }

    #[test]
    fn rejects_gaps() {
        let result = Image::new(vec![segment(0, 2, true), segment(3, 1, false)]);
        assert_eq!(
            result.err(),
            Some(LoadError::Fragmented {
                expected: PageNumber::new(2),
                found: PageNumber::new(3)
            })
        );
    }

    #[test]
    fn rejects_empty_segments() {
        let result = Image::new(vec![segment(0, 1, true), segment(1, 0, false)]);
        assert_eq!(
            result.err(),
            Some(LoadError::Empty {
                first_page: PageNumber::new(1)
            })
        );
    }

    #[test]
    fn resolves_page_sources() {
        let image = Image::new(vec![segment(0, 2, true), segment(2, 3, false)]).unwrap();

        match image.source(PageNumber::new(3)) {
            PageSource::Segment(segment, index) => {
                assert_eq!(segment.first_page(), PageNumber::new(2));
                assert!(!segment.is_read_only());
                assert_eq!(index, 1);
            }
            PageSource::Zero => panic!("page 3 belongs to the second segment"),
        }

        assert!(matches!(image.source(PageNumber::new(5)), PageSource::Zero));
    }

    #[test]
    fn memory_segment_pads_with_zeros() {
        let mut bytes = vec![0x11; PAGE_SIZE];
        bytes.extend_from_slice(&[0x22; 3]);
        let segment = MemorySegment::new(PageNumber::new(0), bytes, false);
        assert_eq!(segment.page_count(), 2);

        let mut frame = [0xFF; PAGE_SIZE];
        segment.load_page(1, &mut frame);
        assert_eq!(&frame[..3], &[0x22; 3]);
        assert!(frame[3..].iter().all(|&b| b == 0));

        segment.load_page(0, &mut frame);
        assert!(frame.iter().all(|&b| b == 0x11));
    }
}
