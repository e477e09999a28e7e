//! # Record Source
//!
//! Polls a directory for files matching a glob and hands each path to the
//! pipeline at most once for the lifetime of the process.

pub mod directory;
pub mod filter;

pub use directory::DirectorySource;
pub use filter::AcceptOnceFilter;
