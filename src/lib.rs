//! # Prometheus Admission
//!
//! Resource-admission scheduler and job-lifecycle manager for GPU/CPU workloads
//! running on one or more Kubernetes-style clusters.
//!
//! Jobs are submitted against namespace-scoped queues backed by queue pools.
//! Each pool owns nominal quota per resource flavor; pools in the same cohort
//! lend unused quota to each other under weighted fair sharing. A job is
//! admitted when its pool (plus anything it may borrow) covers the request;
//! otherwise lower-priority work may be preempted, and failing that the job
//! waits in priority-then-FIFO order.
//!
//! ## Key Features
//!
//! - **Quota ledger**: per-flavor nominal quota, borrowing and lending limits,
//!   cohort-wide aggregate bound, one lock per cohort.
//! - **Preemption**: minimal victim sets, priority and reclaim rules,
//!   checkpoint-before-evict for training jobs.
//! - **Lifecycle**: versioned compare-and-swap status writes and a status event
//!   stream for every transition.
//! - **Reconciler**: full and incremental passes that repair drift between the
//!   store, the ledger and the substrate, and delete orphaned objects.
//! - **Multi-cluster placement**: filter and score clusters by cost,
//!   availability, latency and utilization.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_admission::builders::SchedulerBuilder;
//! use prometheus_admission::config::{ClusterConfig, FlavorConfig, FlavorQuotaConfig, QueuePoolConfig, SchedulerConfig};
//! use prometheus_admission::core::{JobSpec, JobType, ResourceRequest};
//! use prometheus_admission::infra::InMemorySubstrate;
//! use prometheus_admission::util::serde::ResourceVector;
//!
//! let cluster = ClusterConfig::new("c1")
//!     .with_flavor(FlavorConfig::gpu("a100", "a100"))
//!     .with_pool(QueuePoolConfig::new("research")
//!         .with_flavor(FlavorQuotaConfig::new("a100", ResourceVector::new(8, 0, 0))));
//! let config = SchedulerConfig::new(cluster).with_fallback_pool("research");
//! let scheduler = SchedulerBuilder::new(config)
//!     .with_substrate("c1", Arc::new(InMemorySubstrate::new()))
//!     .build()?;
//!
//! let spec = JobSpec::new("train", "team-a", JobType::Training, ResourceRequest::gpus("a100", 4));
//! let submitted = scheduler.submit(spec, Some("train-v1".into())).await?;
//! ```
//!
//! See `tests/admission_algorithm_test.rs` for end-to-end scenarios.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling: job model, ledger, admission, lifecycle, reconciliation.
pub mod core;
/// Configuration models for clusters, pools, queues and control-loop timing.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Infrastructure adapters: job stores, pending queues, reference substrate.
pub mod infra;
/// Runtime surface: request/response API and the control loop.
pub mod runtime;
/// Shared utilities.
pub mod util;
