//! System call numbers.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    /// Terminate the calling task; ebx = exit code.
    Exit = 1,
    /// Write one character; ebx = character.
    Putc = 2,
    /// Write a NUL-terminated string; ebx = pointer.
    Puts = 3,
    /// Read one line of input; ebx = buffer, ecx = capacity. Blocks until
    /// a full line is available.
    Gets = 4,
    /// Spawn a program from the boot archive; ebx = path, ecx = argv.
    Exec = 5,
    /// Give up the rest of the timeslice.
    Yield = 6,

    Unknown = u32::MAX,
}

impl From<u32> for SyscallNumber {
    fn from(num: u32) -> Self {
        match num {
            1 => Self::Exit,
            2 => Self::Putc,
            3 => Self::Puts,
            4 => Self::Gets,
            5 => Self::Exec,
            6 => Self::Yield,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_round_trip() {
        for nr in [1u32, 2, 3, 4, 5, 6] {
            assert_eq!(SyscallNumber::from(nr) as u32, nr);
        }
        assert_eq!(SyscallNumber::from(0), SyscallNumber::Unknown);
        assert_eq!(SyscallNumber::from(99), SyscallNumber::Unknown);
    }
}
