//! `log` facade backed by the serial port.

use core::fmt::Write;

use log::{LevelFilter, Log, Metadata, Record};

use super::serial::SERIAL;

struct SerialLogger;

impl Log for SerialLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let mut serial = SERIAL.lock();
        let _ = writeln!(serial, "[{:5}] {}", record.level(), record.args());
    }

    fn flush(&self) {}
}

static LOGGER: SerialLogger = SerialLogger;

pub fn init(level: LevelFilter) {
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
