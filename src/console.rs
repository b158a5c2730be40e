//! Console output for devsim
//!
//! A `log` backend that writes one line per record to stderr:
//!
//! ```text
//! [INFO  device] SSD: block 0 <- "hello"
//! ```
//!
//! Lines from the worker thread and callers are serialized through a single
//! console lock so they never interleave.

use std::io::Write;

use log::{Level, LevelFilter, Log, Metadata, Record};
use spin::Mutex;

/// Console writer
pub struct Console {
    lines: usize,
}

impl Console {
    pub const fn new() -> Self {
        Console { lines: 0 }
    }

    /// Write one already-formatted line to stderr
    pub fn write_line(&mut self, line: &str) {
        let stderr = std::io::stderr();
        let mut out = stderr.lock();
        // Nothing useful to do if stderr is gone
        let _ = writeln!(out, "{}", line);
        self.lines += 1;
    }

    /// Lines written since start-up
    pub fn lines(&self) -> usize {
        self.lines
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

/// Global console instance
static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

/// `log` backend writing through [`CONSOLE`]
struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_record(record.level(), record.target(), record.args());
        CONSOLE.lock().write_line(&line);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

/// `[LEVEL target] message`
fn format_record(level: Level, target: &str, args: &core::fmt::Arguments) -> String {
    format!("[{:<5} {}] {}", level, target, args)
}

/// Install the console logger at `level`
///
/// Returns `false` if another logger was installed first; the level is
/// applied either way.
pub fn init(level: LevelFilter) -> bool {
    let installed = log::set_logger(&LOGGER).is_ok();
    log::set_max_level(level);
    installed
}

/// Change the maximum level after [`init`]
pub fn set_level(level: LevelFilter) {
    log::set_max_level(level);
}

/// Lines written by the console logger so far
pub fn lines_written() -> usize {
    CONSOLE.lock().lines()
}
