//! Randomized concurrent workload.
//!
//! Every simulated process runs as a rayon task against one shared memory manager. Each
//! keeps a shadow copy of its address space and checks every read and write against it,
//! so a page lost or mixed up by eviction shows up as a mismatch.

use std::{fmt, sync::Arc};

use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use spin::relax::RelaxStrategy;
use vmm::{
    AddressSpace, Exception, Image, MemoryManager, MemorySegment, MemoryStats, PAGE_SIZE,
    PageNumber, Resolution, Segment, SwapDevice, VirtualAddress, handle_exception,
};

/// Parameters of a stress run.
#[derive(Debug, Clone, Copy)]
pub struct StressOptions {
    pub processes: usize,
    /// Reads and writes performed by each process.
    pub operations: usize,
    pub seed: u64,
    /// Writable pages following the read-only code page.
    pub data_pages: usize,
}

/// Totals over every process of a stress run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StressReport {
    pub reads: usize,
    pub writes: usize,
    pub bytes_read: usize,
    pub bytes_written: usize,
    pub refused_writes: usize,
    pub frames_released: usize,
    pub slots_released: usize,
}

impl StressReport {
    fn merge(mut self, other: Self) -> Self {
        self.reads += other.reads;
        self.writes += other.writes;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
        self.refused_writes += other.refused_writes;
        self.frames_released += other.frames_released;
        self.slots_released += other.slots_released;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StressError {
    /// A read returned bytes that differ from the shadow copy.
    Mismatch {
        process: usize,
        operation: usize,
        address: VirtualAddress,
    },
    /// An access transferred a different number of bytes than expected.
    Transfer {
        process: usize,
        operation: usize,
        expected: usize,
        actual: usize,
    },
    /// An out-of-range fault did not terminate the process.
    Unterminated {
        process: usize,
        address: VirtualAddress,
    },
    /// Frames or swap slots were still held after every process exited.
    Leak(MemoryStats),
}

impl fmt::Display for StressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StressError::Mismatch {
                process,
                operation,
                address,
            } => write!(
                f,
                "process {process}, operation {operation}: read mismatch at {address}"
            ),
            StressError::Transfer {
                process,
                operation,
                expected,
                actual,
            } => write!(
                f,
                "process {process}, operation {operation}: transferred {actual} bytes, expected {expected}"
            ),
            StressError::Unterminated { process, address } => write!(
                f,
                "process {process}: fault at {address} outside the address space was resolved"
            ),
            StressError::Leak(stats) => write!(
                f,
                "leak after teardown: {} of {} frames free, {} pinned, {} of {} swap slots free",
                stats.free_frames,
                stats.total_frames,
                stats.pinned_frames,
                stats.free_slots,
                stats.swap_extent
            ),
        }
    }
}

impl std::error::Error for StressError {}

/// Runs `options.processes` processes in parallel and checks that nothing leaked.
pub fn run<D, R>(
    manager: &Arc<MemoryManager<D, R>>,
    options: &StressOptions,
) -> Result<StressReport, StressError>
where
    D: SwapDevice + Send,
    R: RelaxStrategy,
{
    let report = (0..options.processes)
        .into_par_iter()
        .map(|process| Process::spawn(manager, options, process).run(options.operations))
        .try_reduce(StressReport::default, |a, b| Ok(a.merge(b)))?;

    let stats = manager.stats();
    if stats.free_frames != stats.total_frames
        || stats.pinned_frames != 0
        || stats.free_slots != stats.swap_extent
    {
        return Err(StressError::Leak(stats));
    }
    Ok(report)
}

/// One simulated process and its shadow copy.
struct Process<D: SwapDevice, R: RelaxStrategy> {
    index: usize,
    space: AddressSpace<D, R>,
    shadow: Vec<u8>,
    rng: StdRng,
    report: StressReport,
}

impl<D: SwapDevice, R: RelaxStrategy> Process<D, R> {
    fn spawn(manager: &Arc<MemoryManager<D, R>>, options: &StressOptions, index: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(index as u64));

        let mut code = vec![0u8; PAGE_SIZE];
        rng.fill(&mut code[..]);
        let mut data = vec![0u8; options.data_pages * PAGE_SIZE];
        rng.fill(&mut data[..]);

        let mut segments: Vec<Box<dyn Segment>> = vec![Box::new(MemorySegment::new(
            PageNumber::new(0),
            code.clone(),
            true,
        ))];
        if options.data_pages > 0 {
            segments.push(Box::new(MemorySegment::new(
                PageNumber::new(1),
                data.clone(),
                false,
            )));
        }
        let image = Image::new(segments).expect("code and data segments are contiguous");
        let space = manager.create_address_space(image);

        let mut shadow = code;
        shadow.extend_from_slice(&data);
        shadow.resize(space.size(), 0);

        Self {
            index,
            space,
            shadow,
            rng,
            report: StressReport::default(),
        }
    }

    fn run(mut self, operations: usize) -> Result<StressReport, StressError> {
        for operation in 0..operations {
            // Occasionally aim past the end to exercise address errors.
            let address = self.rng.gen_range(0..self.space.size() + PAGE_SIZE);
            let length = self.rng.gen_range(1..=2 * PAGE_SIZE);

            if address >= self.space.size() {
                self.fault_outside(address)?;
            }
            if self.rng.gen_bool(0.5) {
                self.write(operation, address, length)?;
            } else {
                self.read(operation, address, length)?;
            }
        }

        self.verify_all(operations)?;
        let teardown = self.space.teardown();
        self.report.frames_released = teardown.frames_released;
        self.report.slots_released = teardown.slots_released;
        Ok(self.report)
    }

    fn fault_outside(&self, address: usize) -> Result<(), StressError> {
        let address = VirtualAddress::new(address);
        match handle_exception(Some(&self.space), Exception::PageFault(address)) {
            Resolution::Terminate(_) => Ok(()),
            Resolution::Resume => Err(StressError::Unterminated {
                process: self.index,
                address,
            }),
        }
    }

    fn expected(&self, address: usize, length: usize) -> usize {
        self.space.size().saturating_sub(address).min(length)
    }

    fn write(&mut self, operation: usize, address: usize, length: usize) -> Result<(), StressError> {
        let mut data = vec![0u8; length];
        self.rng.fill(&mut data[..]);

        // Only the first page is read-only, and writes never move backwards.
        let expected = if address < PAGE_SIZE {
            0
        } else {
            self.expected(address, length)
        };
        let actual = self.space.write(VirtualAddress::new(address), &data);
        self.check_transfer(operation, expected, actual)?;

        if actual == 0 {
            if address < PAGE_SIZE {
                self.report.refused_writes += 1;
            }
        } else {
            self.shadow[address..address + actual].copy_from_slice(&data[..actual]);
        }
        self.report.writes += 1;
        self.report.bytes_written += actual;
        Ok(())
    }

    fn read(&mut self, operation: usize, address: usize, length: usize) -> Result<(), StressError> {
        let mut buffer = vec![0u8; length];
        let expected = self.expected(address, length);
        let actual = self.space.read(VirtualAddress::new(address), &mut buffer);
        self.check_transfer(operation, expected, actual)?;

        self.compare(operation, address, &buffer[..actual])?;
        self.report.reads += 1;
        self.report.bytes_read += actual;
        Ok(())
    }

    fn verify_all(&self, operation: usize) -> Result<(), StressError> {
        let mut buffer = vec![0u8; self.space.size()];
        let actual = self.space.read(VirtualAddress::new(0), &mut buffer);
        self.check_transfer(operation, buffer.len(), actual)?;
        self.compare(operation, 0, &buffer)
    }

    fn compare(&self, operation: usize, address: usize, read: &[u8]) -> Result<(), StressError> {
        if read.is_empty() {
            return Ok(());
        }
        let expected = &self.shadow[address..address + read.len()];
        match read.iter().zip(expected).position(|(a, b)| a != b) {
            None => Ok(()),
            Some(offset) => Err(StressError::Mismatch {
                process: self.index,
                operation,
                address: VirtualAddress::new(address + offset),
            }),
        }
    }

    fn check_transfer(
        &self,
        operation: usize,
        expected: usize,
        actual: usize,
    ) -> Result<(), StressError> {
        if expected == actual {
            Ok(())
        } else {
            Err(StressError::Transfer {
                process: self.index,
                operation,
                expected,
                actual,
            })
        }
    }
}
