//! Collision-free, gap-free identifier allocation over a shared store.

pub mod allocator;
pub mod contracts;
pub mod format;
pub mod metrics;
pub mod storage;
