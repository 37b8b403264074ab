//! Logs to standard error.

use std::io::{self, Write};

use log::LevelFilter;
use spin::{Mutex, Once};

pub struct Console {
    stderr: Mutex<io::Stderr>,
}

static DEFAULT: Once<Console> = Once::new();

impl Console {
    /// Installs the console as the global logger, reporting records up to `level`.
    pub fn init(level: LevelFilter) -> &'static Self {
        let console = DEFAULT.call_once(|| Console {
            stderr: Mutex::new(io::stderr()),
        });
        // A logger may already be installed when the simulator is driven from tests.
        if log::set_logger(console).is_ok() {
            log::set_max_level(level);
        }
        console
    }
}

impl log::Log for Console {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let mut stderr = self.stderr.lock();
        // Nowhere left to report a failure to write a log entry.
        let _ = write_log_entry_to(&mut *stderr, record);
    }

    fn flush(&self) {
        let _ = self.stderr.lock().flush();
    }
}

fn write_log_entry_to(writer: &mut impl Write, record: &log::Record) -> io::Result<()> {
    #[cfg(any(debug_assertions, feature = "detailed-logging"))]
    return writeln!(
        writer,
        "[{} {}:{} {}] {}",
        record.level(),
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        record.target(),
        record.args()
    );
    #[cfg(not(any(debug_assertions, feature = "detailed-logging")))]
    return writeln!(writer, "[{:5}] {}", record.level(), record.args());
}

/// Maps the number of `-v` flags to a level filter.
pub fn level_for(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, Record};

    #[test]
    fn verbosity_levels() {
        assert_eq!(level_for(0), LevelFilter::Info);
        assert_eq!(level_for(1), LevelFilter::Debug);
        assert_eq!(level_for(5), LevelFilter::Trace);
    }

    #[test]
    fn entries_include_the_level_and_message() {
        let mut buffer = Vec::new();
        write_log_entry_to(
            &mut buffer,
            &Record::builder()
                .level(Level::Warn)
                .target("vmm::address_space")
                .args(format_args!("write refused"))
                .build(),
        )
        .unwrap();

        let line = String::from_utf8(buffer).unwrap();
        assert!(line.starts_with("[WARN"));
        assert!(line.ends_with("write refused\n"));
    }
}
