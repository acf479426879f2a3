//! Interrupt dispatch.
//!
//! The vector table of the machine lives in `arch/x86`; this module owns
//! the software side — a registry of handlers by vector number that the
//! trap entry consults for anything the core does not route itself (the
//! timer, the keyboard and the syscall gate are wired directly).

pub mod dispatch;

pub use dispatch::{Dispatch, TrapHandler};
