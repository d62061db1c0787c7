//! Infrastructure adapters: job stores, pending queues and the in-memory substrate.

pub mod queue;
pub mod store;
pub mod substrate;

pub use queue::InMemoryPendingQueue;
pub use store::{FileJobStore, InMemoryJobStore};
pub use substrate::{CheckpointMode, InMemorySubstrate, StaticCapacityFeed, SubstrateCall};
