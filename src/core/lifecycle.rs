//! Job lifecycle state machine.
//!
//! ```text
//! PENDING -> QUEUED -> ADMITTED -> RUNNING -> SUCCEEDED | FAILED
//!                         |           |
//!                         +-> PREEMPTED <-+      PREEMPTED -> QUEUED
//! ```
//!
//! `CANCELLED` is reachable from every non-terminal state. `ADMITTED`/`RUNNING`
//! may reset to `PENDING` when a retryable failure is retried, and `PENDING`,
//! `QUEUED` and `ADMITTED` may fail before execution starts.

use std::sync::Arc;

use crate::core::audit::{build_status_event, EventBus};
use crate::core::job::{Job, JobStatus};
use crate::core::store::{JobStore, StatusUpdate};
use crate::core::SchedulerError;
use crate::util::serde::JobId;

/// Statuses reachable from `from` in one step.
pub const fn allowed_targets(from: JobStatus) -> &'static [JobStatus] {
    use JobStatus::{Admitted, Cancelled, Failed, Pending, Preempted, Queued, Running, Succeeded};
    match from {
        Pending => &[Queued, Cancelled, Failed],
        Queued => &[Admitted, Cancelled, Failed],
        Admitted => &[Running, Preempted, Cancelled, Failed, Pending],
        Running => &[Succeeded, Failed, Preempted, Cancelled, Pending],
        Preempted => &[Queued, Cancelled],
        Succeeded | Failed | Cancelled => &[],
    }
}

/// True when `from -> to` is a valid single step.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    allowed_targets(from).contains(&to)
}

/// Validate a transition for `job_id`.
pub fn check_transition(job_id: JobId, from: JobStatus, to: JobStatus) -> Result<(), SchedulerError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(SchedulerError::InvalidTransition { job_id, from, to })
    }
}

/// Store write path that publishes a [`crate::core::StatusEvent`] per transition.
#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn JobStore>,
    events: Arc<EventBus>,
}

impl Lifecycle {
    /// Wrap a store and an event bus.
    pub fn new(store: Arc<dyn JobStore>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Event bus.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Apply a status update and publish the resulting event.
    pub fn transition(&self, id: JobId, update: StatusUpdate) -> Result<Job, SchedulerError> {
        let change = self.store.update_status(id, update)?;
        self.events.publish(build_status_event(&change.job, change.previous));
        Ok(change.job)
    }
}
