//! In-memory substrate and capacity feed.
//!
//! Reference implementation of the substrate boundary. It keeps every object in
//! a map, records each call in order, and exposes knobs to inject failures,
//! external deletions and orphans.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::substrate::{
    CapacityFeed, ClusterCapacity, LabelSelector, ManagedObject, ObjectKind, ResourceTemplate,
    RunState, Substrate, SubstrateError, TrackingState,
};
use crate::util::serde::{ClusterId, JobId};

/// How the substrate answers checkpoint requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CheckpointMode {
    /// Checkpoint completes at once.
    #[default]
    Immediate,
    /// Checkpoint never completes.
    Never,
    /// Checkpoint completes after the delay.
    After(Duration),
    /// Checkpoint request is rejected.
    Fail,
}

/// One recorded substrate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateCall {
    /// `create_resource` for a job.
    CreateResource(JobId),
    /// `delete_resource` with its grace period.
    DeleteResource {
        /// Resource handle.
        handle: String,
        /// Grace period passed.
        grace: Duration,
    },
    /// `create_tracking` for a job.
    CreateTracking(JobId),
    /// `set_tracking_admitted`.
    SetTrackingAdmitted(String),
    /// `evict_tracking`.
    EvictTracking(String),
    /// `delete_tracking`.
    DeleteTracking(String),
    /// `request_checkpoint`.
    RequestCheckpoint(String),
}

#[derive(Debug, Clone)]
struct ResourceEntry {
    job_id: Option<JobId>,
    state: RunState,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct TrackingEntry {
    job_id: Option<JobId>,
    state: TrackingState,
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct State {
    resources: HashMap<String, ResourceEntry>,
    tracking: HashMap<String, TrackingEntry>,
    calls: Vec<SubstrateCall>,
    failing_creates: u32,
    unavailable: bool,
    checkpoint: CheckpointMode,
    next_handle: u64,
}

impl State {
    fn handle(&mut self, prefix: &str) -> String {
        self.next_handle += 1;
        format!("{prefix}-{}", self.next_handle)
    }

    fn ensure_available(&self) -> Result<(), SubstrateError> {
        if self.unavailable {
            Err(SubstrateError::Unavailable("substrate offline".into()))
        } else {
            Ok(())
        }
    }
}

/// Substrate that lives entirely in memory.
#[derive(Debug, Default)]
pub struct InMemorySubstrate {
    state: Mutex<State>,
}

impl InMemorySubstrate {
    /// Empty substrate.
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded so far, in order.
    pub fn calls(&self) -> Vec<SubstrateCall> {
        self.state.lock().calls.clone()
    }

    /// Fail the next `n` resource creations with a transient error.
    pub fn fail_creates(&self, n: u32) {
        self.state.lock().failing_creates = n;
    }

    /// Make every call fail with a transient error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Change how checkpoint requests are answered.
    pub fn set_checkpoint_mode(&self, mode: CheckpointMode) {
        self.state.lock().checkpoint = mode;
    }

    /// Handle of the resource owned by a job.
    pub fn resource_of(&self, job_id: JobId) -> Option<String> {
        self.state
            .lock()
            .resources
            .iter()
            .find(|(_, r)| r.job_id == Some(job_id))
            .map(|(h, _)| h.clone())
    }

    /// Handle of the tracking object owned by a job.
    pub fn tracking_of(&self, job_id: JobId) -> Option<String> {
        self.state
            .lock()
            .tracking
            .iter()
            .find(|(_, t)| t.job_id == Some(job_id))
            .map(|(h, _)| h.clone())
    }

    /// Tracking state of a job's tracking object.
    pub fn tracking_state_of(&self, job_id: JobId) -> Option<TrackingState> {
        self.state
            .lock()
            .tracking
            .values()
            .find(|t| t.job_id == Some(job_id))
            .map(|t| t.state)
    }

    /// Number of live execution resources.
    pub fn resource_count(&self) -> usize {
        self.state.lock().resources.len()
    }

    /// Number of live tracking objects.
    pub fn tracking_count(&self) -> usize {
        self.state.lock().tracking.len()
    }

    /// Overwrite the run state of a resource.
    pub fn set_run_state(&self, handle: &str, state: RunState) -> Result<(), SubstrateError> {
        let mut guard = self.state.lock();
        let entry = guard
            .resources
            .get_mut(handle)
            .ok_or_else(|| SubstrateError::NotFound(handle.to_string()))?;
        entry.state = state;
        Ok(())
    }

    /// Delete a resource behind the scheduler's back.
    pub fn remove_resource(&self, handle: &str) -> bool {
        self.state.lock().resources.remove(handle).is_some()
    }

    /// Delete a tracking object behind the scheduler's back.
    pub fn remove_tracking(&self, handle: &str) -> bool {
        self.state.lock().tracking.remove(handle).is_some()
    }

    /// Insert an object no job knows about.
    pub fn insert_orphan(&self, kind: ObjectKind, labels: BTreeMap<String, String>) -> String {
        let mut guard = self.state.lock();
        let job_id = labels
            .get(crate::util::serde::JOB_ID_LABEL)
            .and_then(|raw| JobId::parse_str(raw).ok());
        match kind {
            ObjectKind::Resource => {
                let handle = guard.handle("res");
                guard.resources.insert(
                    handle.clone(),
                    ResourceEntry {
                        job_id,
                        state: RunState::Running,
                        labels,
                    },
                );
                handle
            }
            ObjectKind::Tracking => {
                let handle = guard.handle("trk");
                guard.tracking.insert(
                    handle.clone(),
                    TrackingEntry {
                        job_id,
                        state: TrackingState::NotAdmitted,
                        labels,
                    },
                );
                handle
            }
        }
    }
}

fn matches(labels: &BTreeMap<String, String>, selector: &LabelSelector) -> bool {
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

#[async_trait]
impl Substrate for InMemorySubstrate {
    async fn create_resource(&self, template: &ResourceTemplate) -> Result<String, SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::CreateResource(template.job_id));
        state.ensure_available()?;
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(SubstrateError::Unavailable("injected create failure".into()));
        }
        if let Some((handle, _)) = state
            .resources
            .iter()
            .find(|(_, r)| r.job_id == Some(template.job_id))
        {
            return Ok(handle.clone());
        }
        let handle = state.handle("res");
        state.resources.insert(
            handle.clone(),
            ResourceEntry {
                job_id: Some(template.job_id),
                state: RunState::Pending,
                labels: template.labels.clone(),
            },
        );
        Ok(handle)
    }

    async fn resource_status(&self, handle: &str) -> Result<Option<RunState>, SubstrateError> {
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state.resources.get(handle).map(|r| r.state.clone()))
    }

    async fn delete_resource(&self, handle: &str, grace: Duration) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::DeleteResource {
            handle: handle.to_string(),
            grace,
        });
        state.ensure_available()?;
        state.resources.remove(handle);
        Ok(())
    }

    async fn create_tracking(
        &self,
        job_id: JobId,
        labels: &BTreeMap<String, String>,
    ) -> Result<String, SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::CreateTracking(job_id));
        state.ensure_available()?;
        if let Some((handle, _)) = state.tracking.iter().find(|(_, t)| t.job_id == Some(job_id)) {
            return Ok(handle.clone());
        }
        let handle = state.handle("trk");
        state.tracking.insert(
            handle.clone(),
            TrackingEntry {
                job_id: Some(job_id),
                state: TrackingState::NotAdmitted,
                labels: labels.clone(),
            },
        );
        Ok(handle)
    }

    async fn tracking_state(&self, handle: &str) -> Result<Option<TrackingState>, SubstrateError> {
        let state = self.state.lock();
        state.ensure_available()?;
        Ok(state.tracking.get(handle).map(|t| t.state))
    }

    async fn set_tracking_admitted(&self, handle: &str, _flavor: &str) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::SetTrackingAdmitted(handle.to_string()));
        state.ensure_available()?;
        let entry = state
            .tracking
            .get_mut(handle)
            .ok_or_else(|| SubstrateError::NotFound(handle.to_string()))?;
        entry.state = TrackingState::Admitted;
        Ok(())
    }

    async fn evict_tracking(&self, handle: &str) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::EvictTracking(handle.to_string()));
        state.ensure_available()?;
        let entry = state
            .tracking
            .get_mut(handle)
            .ok_or_else(|| SubstrateError::NotFound(handle.to_string()))?;
        entry.state = TrackingState::Evicted;
        Ok(())
    }

    async fn delete_tracking(&self, handle: &str) -> Result<(), SubstrateError> {
        let mut state = self.state.lock();
        state.calls.push(SubstrateCall::DeleteTracking(handle.to_string()));
        state.ensure_available()?;
        state.tracking.remove(handle);
        Ok(())
    }

    async fn list_managed(&self, selector: &LabelSelector) -> Result<Vec<ManagedObject>, SubstrateError> {
        let state = self.state.lock();
        state.ensure_available()?;
        let resources = state
            .resources
            .iter()
            .filter(|(_, r)| matches(&r.labels, selector))
            .map(|(h, r)| ManagedObject {
                kind: ObjectKind::Resource,
                handle: h.clone(),
                labels: r.labels.clone(),
            });
        let tracking = state
            .tracking
            .iter()
            .filter(|(_, t)| matches(&t.labels, selector))
            .map(|(h, t)| ManagedObject {
                kind: ObjectKind::Tracking,
                handle: h.clone(),
                labels: t.labels.clone(),
            });
        let mut objects: Vec<ManagedObject> = resources.chain(tracking).collect();
        objects.sort_by(|a, b| a.handle.cmp(&b.handle));
        Ok(objects)
    }

    async fn request_checkpoint(&self, handle: &str) -> Result<(), SubstrateError> {
        let mode = {
            let mut state = self.state.lock();
            state.calls.push(SubstrateCall::RequestCheckpoint(handle.to_string()));
            state.ensure_available()?;
            if !state.resources.contains_key(handle) {
                return Err(SubstrateError::NotFound(handle.to_string()));
            }
            state.checkpoint
        };
        match mode {
            CheckpointMode::Immediate => Ok(()),
            CheckpointMode::Never => std::future::pending::<Result<(), SubstrateError>>().await,
            CheckpointMode::After(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            CheckpointMode::Fail => Err(SubstrateError::Rejected("checkpoint failed".into())),
        }
    }
}

/// Capacity feed backed by a settable map.
#[derive(Debug, Default)]
pub struct StaticCapacityFeed {
    clusters: Mutex<HashMap<ClusterId, ClusterCapacity>>,
}

impl StaticCapacityFeed {
    /// Feed with no data; every cluster reports empty capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot of one cluster.
    pub fn set_capacity(&self, cluster: impl Into<ClusterId>, capacity: ClusterCapacity) {
        self.clusters.lock().insert(cluster.into(), capacity);
    }

    /// Builder form of [`Self::set_capacity`].
    #[must_use]
    pub fn with_capacity(self, cluster: impl Into<ClusterId>, capacity: ClusterCapacity) -> Self {
        self.set_capacity(cluster, capacity);
        self
    }
}

#[async_trait]
impl CapacityFeed for StaticCapacityFeed {
    async fn cluster_capacity(&self, cluster: &ClusterId) -> Result<ClusterCapacity, SubstrateError> {
        Ok(self.clusters.lock().get(cluster).cloned().unwrap_or_default())
    }
}
