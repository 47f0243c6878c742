//! Filesystem utilities for label-mutex.
//!
//! Atomic writes used by the file-backed lock store.

pub mod atomic;

pub use atomic::atomic_write_file;
