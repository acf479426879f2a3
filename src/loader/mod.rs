//! Program loading.

pub mod elf;

pub use elf::{load, validate};
