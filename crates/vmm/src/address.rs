//! Address types for virtual and physical memory.
//!
//! Virtual addresses are relative to one address space and start at zero. Physical
//! addresses index the flat physical memory buffer owned by the memory manager.

use core::fmt;
use core::ops::Add;

use crate::PAGE_SIZE;

/// Generates the newtype and helpers shared by both address kinds.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Returns the byte offset of this address within its page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % PAGE_SIZE
            }

            /// Checks if the address is aligned to a page boundary.
            #[inline]
            pub const fn is_page_aligned(self) -> bool {
                self.page_offset() == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self::new(self.0 + rhs)
            }
        }
    };
}

impl_address_common!(
    VirtualAddress,
    "A virtual address inside a single address space."
);

impl_address_common!(
    PhysicalAddress,
    "A physical address into the frame pool (`frame * PAGE_SIZE + offset`)."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offset() {
        let addr = VirtualAddress::new(3 * PAGE_SIZE + 17);
        assert_eq!(addr.page_offset(), 17);
        assert!(!addr.is_page_aligned());
        assert!(VirtualAddress::new(2 * PAGE_SIZE).is_page_aligned());
    }

    #[test]
    fn formats_as_hex() {
        let addr = PhysicalAddress::new(0x400);
        assert_eq!(format!("{}", addr), "0x400");
        assert_eq!(format!("{:?}", addr), "PhysicalAddress(0x400)");
    }

    #[test]
    fn adds_offsets() {
        assert_eq!(VirtualAddress::new(8) + 8, VirtualAddress::new(16));
    }
}
