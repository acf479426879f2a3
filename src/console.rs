//! Byte-level console output.
//!
//! PUTC/PUTS and keyboard echo write through this trait. On the machine the
//! sink is VGA text memory plus the serial port; tests capture into a
//! `Vec<u8>`.

pub trait Console {
    fn write_byte(&mut self, byte: u8);

    fn write_bytes(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.write_byte(b);
        }
    }
}

/// Swallows everything; handy where echo is unwanted.
pub struct NullConsole;

impl Console for NullConsole {
    fn write_byte(&mut self, _byte: u8) {}
}

impl Console for alloc::vec::Vec<u8> {
    fn write_byte(&mut self, byte: u8) {
        self.push(byte);
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}
