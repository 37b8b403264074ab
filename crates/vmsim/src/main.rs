use clap::{ArgAction, Parser, Subcommand};
use log::info;
use spin::relax::Yield;
use std::path::PathBuf;
use std::sync::Arc;
use std::{env, process};

use vmm::{DEFAULT_STACK_PAGES, MemoryConfig, MemoryManager, MemoryStats};

mod console;
mod scenario;
mod stress;
mod swap_file;

use console::Console;
use stress::StressOptions;
use swap_file::FileSwapDevice;

/// Simulated processes block by yielding to the host scheduler.
type Manager = MemoryManager<FileSwapDevice, Yield>;

#[derive(Parser)]
#[command(name = "vmsim")]
#[command(about = "Drives the Polaris virtual memory manager with simulated processes")]
struct Args {
    /// Number of physical frames (default: 4 for scenario, 16 for stress)
    #[arg(short, long, global = true)]
    frames: Option<usize>,

    /// Stack pages per process (default: 1 for scenario, 8 for stress)
    #[arg(long, global = true)]
    stack_pages: Option<usize>,

    /// Swap file, created at start and removed at exit
    #[arg(long, global = true)]
    swap_file: Option<PathBuf>,

    /// Log more detail (-v for debug, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fault in every page of one process over a small frame pool and report each eviction
    Scenario,
    /// Run processes in parallel doing random reads and writes checked against a shadow copy
    Stress {
        /// Number of simulated processes
        #[arg(short, long, default_value_t = 8)]
        processes: usize,

        /// Reads and writes per process
        #[arg(short, long, default_value_t = 1000)]
        operations: usize,

        /// Seed for the random workload
        #[arg(short, long, default_value_t = 0)]
        seed: u64,

        /// Writable data pages per process
        #[arg(long, default_value_t = 4)]
        data_pages: usize,
    },
}

impl Command {
    fn default_config(&self) -> MemoryConfig {
        match self {
            Command::Scenario => MemoryConfig::new(4).with_stack_pages(1),
            Command::Stress { .. } => MemoryConfig::new(16).with_stack_pages(DEFAULT_STACK_PAGES),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    Console::init(console::level_for(args.verbose));

    let defaults = args.command.default_config();
    let config = MemoryConfig::new(args.frames.unwrap_or(defaults.frames))
        .with_stack_pages(args.stack_pages.unwrap_or(defaults.stack_pages));
    if config.frames == 0 {
        return Err("at least one frame is required".into());
    }

    let swap_path = args
        .swap_file
        .unwrap_or_else(|| env::temp_dir().join(format!("vmsim-{}.swap", process::id())));
    let device = FileSwapDevice::create(&swap_path)?;
    info!("swapping to {}", device.path().display());
    let manager: Arc<Manager> = MemoryManager::new(config, device);

    let result = run(&manager, args.command);
    print_stats(&manager.stats());
    MemoryManager::shutdown(manager);
    result
}

fn run(manager: &Arc<Manager>, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Scenario => {
            let report = scenario::run(manager)?;
            println!("{} evictions, all in load order", report.evicted.len());
        }
        Command::Stress {
            processes,
            operations,
            seed,
            data_pages,
        } => {
            let options = StressOptions {
                processes,
                operations,
                seed,
                data_pages,
            };
            let report = stress::run(manager, &options)?;
            println!(
                "{} reads ({} bytes), {} writes ({} bytes), {} refused",
                report.reads,
                report.bytes_read,
                report.writes,
                report.bytes_written,
                report.refused_writes
            );
            println!(
                "teardown released {} frames and {} swap slots",
                report.frames_released, report.slots_released
            );
        }
    }
    Ok(())
}

fn print_stats(stats: &MemoryStats) {
    println!(
        "frames: {} total, {} free, {} pinned",
        stats.total_frames, stats.free_frames, stats.pinned_frames
    );
    println!(
        "swap: {} slots, {} free",
        stats.swap_extent, stats.free_slots
    );
    println!(
        "faults: {}, evictions: {}, swap writes: {}, swap reads: {}",
        stats.page_faults, stats.evictions, stats.swap_writes, stats.swap_reads
    );
}
