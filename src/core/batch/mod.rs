// logflux_rust/src/core/batch/mod.rs

pub mod batched_events;
pub mod batcher;

pub use batched_events::BatchedEvents;
pub use batcher::{BatchKey, Batcher, BatcherConfig};
