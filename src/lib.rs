//! parfor: statically partitioned parallel for-loops
//!
//! This crate runs a loop body over a one- or two-dimensional index range on
//! a fixed number of threads. The range is split once, up front, into
//! contiguous chunks of near-equal size; each chunk but the last runs on its
//! own scoped thread and the last runs on the calling thread.

pub mod chunks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod sync;
pub mod timer;

// Re-export main types at crate root
pub use chunks::{partition, partition_2d, Chunk, ChunkPlan, GridChunk, GridPlan};
pub use config::{ForConfig, SpawnPolicy};
pub use dispatch::{parallel_for, parallel_for_2d, Executor, RunReport};
pub use error::{Dimension, ForError};
pub use timer::{Elapsed, TimingReport};
