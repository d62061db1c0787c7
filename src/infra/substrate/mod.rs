//! Substrate and capacity-feed adapters.

pub mod memory;

pub use memory::{CheckpointMode, InMemorySubstrate, StaticCapacityFeed, SubstrateCall};
