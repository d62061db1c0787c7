//! Core scheduling: job model, quota ledger, admission, lifecycle and reconciliation.

pub mod admission;
pub mod audit;
pub mod error;
pub mod fair_share;
pub mod job;
pub mod ledger;
pub mod lifecycle;
pub mod preemption;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod substrate;

pub use admission::{AdmissionDecision, AdmissionOutcome, QueueReason, TopologyFit};
pub use audit::{EventBus, EventSink, InMemoryEventSink, StatusEvent};
pub use error::{AppResult, SchedulerError};
pub use job::{
    AdmissionRecord, Job, JobIntent, JobPatch, JobPolicy, JobSpec, JobStatus, JobType, NewJob,
    OptimizationGoal, ResourceRequest, TopologyOffer,
};
pub use ledger::{Assignment, CohortUsage, LedgerGuard, ResourceLedger};
pub use lifecycle::Lifecycle;
pub use preemption::{Candidate, PriorityTable};
pub use queue::{PendingEntry, PendingQueue};
pub use reconciler::ReconcileReport;
pub use retry::{FailureKind, RetryDecision};
pub use scheduler::{AdmissionScheduler, ClusterRuntime};
pub use selector::ClusterScore;
pub use store::{CreateOutcome, JobFilter, JobStore, StatusChange, StatusUpdate};
pub use substrate::{
    CapacityFeed, ClusterCapacity, FailureCause, FlavorCapacity, RunState, Substrate,
    SubstrateError, TrackingState,
};
