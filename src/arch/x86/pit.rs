//! Programmable interval timer.

use super::port::outb;
use crate::layout::TIMER_HZ;

const PIT_BASE_HZ: u32 = 1_193_182;
const CHANNEL_0: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Program channel 0 as a rate generator at [`TIMER_HZ`]; every expiry
/// raises IRQ 0 and drives the scheduler.
pub fn init() {
    let divisor = (PIT_BASE_HZ / TIMER_HZ) as u16;
    unsafe {
        outb(COMMAND, 0x36); // channel 0, lobyte/hibyte, mode 3
        outb(CHANNEL_0, (divisor & 0xff) as u8);
        outb(CHANNEL_0, (divisor >> 8) as u8);
    }
}
