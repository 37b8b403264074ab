//! Page, frame and swap slot number types.
//!
//! These newtypes keep the three index spaces of the memory manager apart: virtual pages
//! belong to one address space, frames index the global physical pool and slots index the
//! swap extent.

use crate::{
    PAGE_SIZE,
    address::{PhysicalAddress, VirtualAddress},
};
use core::{
    fmt,
    ops::{Add, Sub},
};

/// Generates the newtype and the arithmetic shared by every page-granular number.
macro_rules! impl_page_number_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new number.
            #[inline]
            pub const fn new(number: usize) -> Self {
                Self(number)
            }

            /// Returns the raw number.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_page_number_common!(
    FrameNumber,
    "A physical memory frame number.\n\n\
     Frames are zero-indexed and cover `PAGE_SIZE` bytes of the physical pool each."
);

impl FrameNumber {
    /// Returns the physical address at the start of this frame.
    #[inline]
    pub const fn start(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 * PAGE_SIZE)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(addr: PhysicalAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

impl_page_number_common!(
    PageNumber,
    "A virtual page number within one address space.\n\n\
     Page numbers index the address space's translation entries directly."
);

impl PageNumber {
    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

impl_page_number_common!(
    SwapSlot,
    "A slot in the swap extent.\n\n\
     Each slot holds exactly one evicted page."
);

impl SwapSlot {
    /// Returns the byte offset of this slot on the swap device.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 * PAGE_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod frame_number {
        use super::*;

        #[test]
        fn start_address() {
            let frame = FrameNumber::new(3);
            assert_eq!(frame.start().as_usize(), 3 * PAGE_SIZE);
        }

        #[test]
        fn from_physical_address() {
            let addr = PhysicalAddress::new(PAGE_SIZE * 3 + 10);
            assert_eq!(FrameNumber::from(addr), FrameNumber::new(3));
        }

        #[test]
        fn debug_format() {
            assert_eq!(format!("{:?}", FrameNumber::new(7)), "FrameNumber(7)");
        }
    }

    mod page_number {
        use super::*;

        #[test]
        fn from_virtual_address() {
            let addr = VirtualAddress::new(PAGE_SIZE * 5 + PAGE_SIZE - 1);
            assert_eq!(PageNumber::from(addr), PageNumber::new(5));
        }

        #[test]
        fn arithmetic() {
            let page = PageNumber::new(10);
            assert_eq!((page + 5).as_usize(), 15);
            assert_eq!(PageNumber::new(10) - PageNumber::new(3), 7);
        }

        #[test]
        fn round_trip() {
            let page = PageNumber::new(42);
            assert_eq!(PageNumber::from(page.start()), page);
        }
    }

    mod swap_slot {
        use super::*;

        #[test]
        fn offset_is_page_scaled() {
            assert_eq!(SwapSlot::new(0).offset(), 0);
            assert_eq!(SwapSlot::new(4).offset(), 4 * PAGE_SIZE);
        }
    }
}
