//! VGA text mode output.

use spin::Mutex;

use crate::console::Console;

const BUFFER: usize = 0xb8000;
const WIDTH: usize = 80;
const HEIGHT: usize = 25;
const ATTR: u8 = 0x07; // light grey on black

pub struct VgaWriter {
    row: usize,
    col: usize,
}

impl VgaWriter {
    const fn new() -> Self {
        Self { row: 0, col: 0 }
    }

    fn cell(&self, row: usize, col: usize) -> *mut u16 {
        (BUFFER + 2 * (row * WIDTH + col)) as *mut u16
    }

    fn put(&mut self, byte: u8) {
        match byte {
            b'\n' => self.newline(),
            0x08 => {
                if self.col > 0 {
                    self.col -= 1;
                }
            }
            _ => {
                unsafe {
                    self.cell(self.row, self.col)
                        .write_volatile(u16::from(byte) | (u16::from(ATTR) << 8))
                };
                self.col += 1;
                if self.col == WIDTH {
                    self.newline();
                }
            }
        }
    }

    fn newline(&mut self) {
        self.col = 0;
        if self.row + 1 < HEIGHT {
            self.row += 1;
            return;
        }
        // Scroll everything up one row.
        for row in 1..HEIGHT {
            for col in 0..WIDTH {
                let value = unsafe { self.cell(row, col).read_volatile() };
                unsafe { self.cell(row - 1, col).write_volatile(value) };
            }
        }
        for col in 0..WIDTH {
            unsafe {
                self.cell(HEIGHT - 1, col)
                    .write_volatile(u16::from(b' ') | (u16::from(ATTR) << 8))
            };
        }
    }

    pub fn clear(&mut self) {
        for row in 0..HEIGHT {
            for col in 0..WIDTH {
                unsafe {
                    self.cell(row, col)
                        .write_volatile(u16::from(b' ') | (u16::from(ATTR) << 8))
                };
            }
        }
        self.row = 0;
        self.col = 0;
    }
}

pub static VGA: Mutex<VgaWriter> = Mutex::new(VgaWriter::new());

pub fn init() {
    VGA.lock().clear();
}

/// The console the syscall layer writes through: VGA text plus the serial
/// port, so output is visible both on screen and on the wire.
pub struct ScreenConsole;

impl Console for ScreenConsole {
    fn write_byte(&mut self, byte: u8) {
        VGA.lock().put(byte);
        super::serial::SERIAL.lock().write_byte(byte);
    }
}
