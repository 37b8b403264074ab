//! Exception dispatch for page faults.
//!
//! A process either supports demand paging, in which case it has a [`FaultHandler`], or it
//! does not. Exceptions are routed on that capability alone.

use core::fmt;

use log::debug;

use crate::VirtualAddress;

/// A fault the memory manager could not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The address is outside the process's mapped range.
    AddressError {
        address: VirtualAddress,
        /// Size of the address space in bytes.
        limit: usize,
    },
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::AddressError { address, limit } => write!(
                f,
                "address {address} is outside an address space of {limit:#x} bytes"
            ),
        }
    }
}

impl core::error::Error for Fault {}

/// Resolves page faults for one process.
pub trait FaultHandler {
    /// Makes the page covering `addr` resident.
    fn handle_fault(&self, addr: VirtualAddress) -> Result<(), Fault>;
}

/// A memory exception raised while a process was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// The translation for the address was not valid.
    PageFault(VirtualAddress),
    /// The address could not be translated at all.
    AddressError(VirtualAddress),
}

/// What the caller should do with the process that raised an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Retry the faulting instruction.
    Resume,
    /// Terminate the process.
    Terminate(Fault),
}

/// Dispatches `exception` to the process's fault handler, if it has one.
///
/// Processes without a handler cannot take page faults, so any exception terminates them.
pub fn handle_exception(handler: Option<&dyn FaultHandler>, exception: Exception) -> Resolution {
    let (handler, address) = match (handler, exception) {
        (Some(handler), Exception::PageFault(address)) => (handler, address),
        (_, Exception::PageFault(address) | Exception::AddressError(address)) => {
            debug!("terminating on {exception:?}");
            // The mapped range is not known here.
            return Resolution::Terminate(Fault::AddressError { address, limit: 0 });
        }
    };

    match handler.handle_fault(address) {
        Ok(()) => Resolution::Resume,
        Err(fault) => {
            debug!("terminating on unresolved fault: {fault}");
            Resolution::Terminate(fault)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PAGE_SIZE;
    use core::cell::Cell;

    /// Accepts addresses in its first page and counts the faults it resolves.
    struct OnePage {
        resolved: Cell<usize>,
    }

    impl FaultHandler for OnePage {
        fn handle_fault(&self, addr: VirtualAddress) -> Result<(), Fault> {
            if addr.as_usize() >= PAGE_SIZE {
                return Err(Fault::AddressError {
                    address: addr,
                    limit: PAGE_SIZE,
                });
            }
            self.resolved.set(self.resolved.get() + 1);
            Ok(())
        }
    }

    fn handler() -> OnePage {
        OnePage {
            resolved: Cell::new(0),
        }
    }

    #[test]
    fn resolved_page_faults_resume() {
        let handler = handler();
        let exception = Exception::PageFault(VirtualAddress::new(8));

        assert_eq!(handle_exception(Some(&handler), exception), Resolution::Resume);
        assert_eq!(handler.resolved.get(), 1);
    }

    #[test]
    fn unresolved_page_faults_terminate() {
        let handler = handler();
        let address = VirtualAddress::new(PAGE_SIZE);

        assert_eq!(
            handle_exception(Some(&handler), Exception::PageFault(address)),
            Resolution::Terminate(Fault::AddressError {
                address,
                limit: PAGE_SIZE,
            })
        );
    }

    #[test]
    fn address_errors_never_reach_the_handler() {
        let handler = handler();
        let address = VirtualAddress::new(4);

        let resolution = handle_exception(Some(&handler), Exception::AddressError(address));
        assert!(matches!(resolution, Resolution::Terminate(_)));
        assert_eq!(handler.resolved.get(), 0);
    }

    #[test]
    fn processes_without_paging_terminate_on_page_faults() {
        let resolution = handle_exception(None, Exception::PageFault(VirtualAddress::new(0)));
        assert!(matches!(
            resolution,
            Resolution::Terminate(Fault::AddressError { .. })
        ));
    }

    #[test]
    fn display() {
        let fault = Fault::AddressError {
            address: VirtualAddress::new(0x2400),
            limit: 0x2000,
        };
        assert_eq!(
            format!("{fault}"),
            "address 0x2400 is outside an address space of 0x2000 bytes"
        );
    }
}
