//! Token-based distributed mutual exclusion and the read/write lock on top of it.

pub mod distributed;
pub mod read_write;

pub use distributed::{DistributedLock, LockStatus, TokenState, TokenVector};
pub use read_write::{DistributedRwLock, DistributedWriteGuard};
