//! Exclusive session lock backends.

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "file")]
pub use file::{FileLockProvider, FileSessionLock};

#[cfg(feature = "memory")]
pub use memory::{MemoryLockTable, MemorySessionLock};
