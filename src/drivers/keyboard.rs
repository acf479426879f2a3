//! PS/2 keyboard input.
//!
//! The IRQ 1 handler reads one scancode from the controller port and feeds
//! it here; everything below the port read is ordinary logic. Scancodes are
//! decoded with `pc-keyboard` (set 1), edited into a line buffer with
//! backspace handling, and completed lines are queued for the GETS syscall.
//! A completed line is the wake-up condition for tasks blocked in
//! WaitingForInput.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use pc_keyboard::{layouts, DecodedKey, HandleControl, Keyboard, ScancodeSet1};

use crate::console::Console;

/// Longest editable line; further input is dropped until Enter.
const LINE_MAX: usize = 256;

pub struct InputQueue {
    keyboard: Keyboard<layouts::Us104Key, ScancodeSet1>,
    /// The line being edited, not yet visible to readers.
    pending: Vec<u8>,
    /// Completed input, newline-terminated, oldest first.
    ready: VecDeque<u8>,
}

impl InputQueue {
    pub fn new() -> Self {
        Self {
            keyboard: Keyboard::new(
                ScancodeSet1::new(),
                layouts::Us104Key,
                HandleControl::Ignore,
            ),
            pending: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Feed one raw scancode; echoes through `console`. Returns `true` when
    /// a completed line became available, i.e. input waiters should wake.
    pub fn push_scancode(&mut self, scancode: u8, console: &mut dyn Console) -> bool {
        let event = match self.keyboard.add_byte(scancode) {
            Ok(Some(event)) => event,
            _ => return false,
        };
        match self.keyboard.process_keyevent(event) {
            Some(DecodedKey::Unicode(ch)) => self.push_char(ch, console),
            _ => false,
        }
    }

    fn push_char(&mut self, ch: char, console: &mut dyn Console) -> bool {
        match ch {
            '\n' | '\r' => {
                console.write_byte(b'\n');
                self.pending.push(b'\n');
                self.ready.extend(self.pending.drain(..));
                true
            }
            '\x08' | '\x7f' => {
                if self.pending.pop().is_some() {
                    console.write_bytes(b"\x08 \x08");
                }
                false
            }
            ch if ch.is_ascii() && !ch.is_ascii_control() => {
                if self.pending.len() < LINE_MAX {
                    self.pending.push(ch as u8);
                    console.write_byte(ch as u8);
                }
                false
            }
            _ => false,
        }
    }

    /// Whether a completed line is waiting to be read.
    pub fn has_line(&self) -> bool {
        self.ready.iter().any(|&b| b == b'\n')
    }

    /// Pop the next completed line into `buf`, without its terminating
    /// newline. Returns the number of bytes copied, or `None` when no full
    /// line is buffered.
    pub fn read_line(&mut self, buf: &mut [u8]) -> Option<usize> {
        if !self.has_line() {
            return None;
        }
        let mut copied = 0;
        while let Some(byte) = self.ready.pop_front() {
            if byte == b'\n' {
                break;
            }
            if copied < buf.len() {
                buf[copied] = byte;
                copied += 1;
            }
        }
        Some(copied)
    }
}

impl Default for InputQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::NullConsole;

    // Set-1 make codes for a few keys.
    const KEY_H: u8 = 0x23;
    const KEY_I: u8 = 0x17;
    const KEY_ENTER: u8 = 0x1c;
    const KEY_BACKSPACE: u8 = 0x0e;

    fn type_key(q: &mut InputQueue, code: u8, echo: &mut dyn Console) -> bool {
        let woke = q.push_scancode(code, echo);
        // Key release; never produces input.
        q.push_scancode(code | 0x80, echo);
        woke
    }

    #[test]
    fn line_is_buffered_until_enter() {
        let mut q = InputQueue::new();
        let mut echo = Vec::new();

        assert!(!type_key(&mut q, KEY_H, &mut echo));
        assert!(!type_key(&mut q, KEY_I, &mut echo));
        assert!(!q.has_line());

        let mut buf = [0u8; 16];
        assert_eq!(q.read_line(&mut buf), None);

        assert!(type_key(&mut q, KEY_ENTER, &mut echo));
        assert!(q.has_line());
        let n = q.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");
        assert_eq!(echo, b"hi\n");
    }

    #[test]
    fn backspace_edits_the_pending_line() {
        let mut q = InputQueue::new();
        let mut echo = NullConsole;

        type_key(&mut q, KEY_H, &mut echo);
        type_key(&mut q, KEY_I, &mut echo);
        type_key(&mut q, KEY_BACKSPACE, &mut echo);
        type_key(&mut q, KEY_ENTER, &mut echo);

        let mut buf = [0u8; 16];
        let n = q.read_line(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"h");
    }

    #[test]
    fn lines_queue_in_order() {
        let mut q = InputQueue::new();
        let mut echo = NullConsole;

        type_key(&mut q, KEY_H, &mut echo);
        type_key(&mut q, KEY_ENTER, &mut echo);
        type_key(&mut q, KEY_I, &mut echo);
        type_key(&mut q, KEY_ENTER, &mut echo);

        let mut buf = [0u8; 16];
        assert_eq!(q.read_line(&mut buf), Some(1));
        assert_eq!(buf[0], b'h');
        assert_eq!(q.read_line(&mut buf), Some(1));
        assert_eq!(buf[0], b'i');
        assert_eq!(q.read_line(&mut buf), None);
    }

    #[test]
    fn short_reader_buffer_truncates_but_consumes() {
        let mut q = InputQueue::new();
        let mut echo = NullConsole;

        type_key(&mut q, KEY_H, &mut echo);
        type_key(&mut q, KEY_I, &mut echo);
        type_key(&mut q, KEY_ENTER, &mut echo);

        let mut buf = [0u8; 1];
        assert_eq!(q.read_line(&mut buf), Some(1));
        assert_eq!(buf[0], b'h');
        // The rest of the line is gone with it.
        assert_eq!(q.read_line(&mut buf), None);
    }
}
