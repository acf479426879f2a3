//! The read-only boot filesystem.

pub mod tar;

pub use tar::TarArchive;
