//! Status-transition events and their sinks.
//!
//! Every status change made through [`crate::core::Lifecycle`] produces one
//! [`StatusEvent`]. Sinks receive events synchronously, in transition order.

use std::collections::VecDeque;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::job::{Job, JobStatus};
use crate::util::clock::now_ms;
use crate::util::serde::{ClusterId, JobId};

/// One status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Event identifier.
    pub event_id: Uuid,
    /// Job that moved.
    pub job_id: JobId,
    /// Cluster owning the job.
    pub cluster: ClusterId,
    /// Previous status.
    pub from: JobStatus,
    /// New status.
    pub to: JobStatus,
    /// Reason attached to the transition.
    pub reason: Option<String>,
    /// Checkpoint outcome, set on `PREEMPTED` and checkpointed failures.
    pub checkpoint_saved: Option<bool>,
    /// Version written by the transition.
    pub version: u64,
    /// Timestamp (ms since epoch).
    pub at_ms: u128,
}

/// Event sink abstraction.
pub trait EventSink: Send {
    /// Record a status event.
    fn record(&mut self, event: StatusEvent);
}

/// Bounded in-memory sink for tests and local inspection.
pub struct InMemoryEventSink {
    events: VecDeque<StatusEvent>,
    max_events: usize,
}

impl InMemoryEventSink {
    /// Create a sink keeping at most `max_events`, oldest dropped first.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events.min(1024)),
            max_events,
        }
    }

    /// Snapshot of stored events.
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.iter().cloned().collect()
    }
}

impl EventSink for InMemoryEventSink {
    fn record(&mut self, event: StatusEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink forwarding events to a crossbeam channel.
pub struct ChannelEventSink {
    tx: Sender<StatusEvent>,
}

impl ChannelEventSink {
    /// Wrap a sender.
    pub const fn new(tx: Sender<StatusEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelEventSink {
    fn record(&mut self, event: StatusEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("status event subscriber dropped");
        }
    }
}

/// Fan-out of status events to registered sinks and a bounded recent-history buffer.
pub struct EventBus {
    sinks: Mutex<Vec<Box<dyn EventSink>>>,
    recent: Mutex<InMemoryEventSink>,
}

impl EventBus {
    /// Bus retaining the last `history` events.
    pub fn new(history: usize) -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
            recent: Mutex::new(InMemoryEventSink::new(history)),
        }
    }

    /// Register a sink.
    pub fn add_sink(&self, sink: Box<dyn EventSink>) {
        self.sinks.lock().push(sink);
    }

    /// New unbounded subscription receiving every subsequent event.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.add_sink(Box::new(ChannelEventSink::new(tx)));
        rx
    }

    /// Deliver an event to every sink.
    pub fn publish(&self, event: StatusEvent) {
        tracing::debug!(
            job_id = %event.job_id,
            cluster = %event.cluster,
            from = %event.from,
            to = %event.to,
            reason = event.reason.as_deref().unwrap_or(""),
            "status transition"
        );
        {
            let mut sinks = self.sinks.lock();
            for sink in sinks.iter_mut() {
                sink.record(event.clone());
            }
        }
        self.recent.lock().record(event);
    }

    /// Recent events, oldest first.
    pub fn recent(&self) -> Vec<StatusEvent> {
        self.recent.lock().events()
    }
}

/// Build the event describing `job`'s move from `from` to its current status.
pub fn build_status_event(job: &Job, from: JobStatus) -> StatusEvent {
    StatusEvent {
        event_id: Uuid::new_v4(),
        job_id: job.id,
        cluster: job.cluster.clone(),
        from,
        to: job.status,
        reason: job.status_message.clone(),
        checkpoint_saved: if job.status == JobStatus::Preempted || job.status == JobStatus::Failed {
            job.checkpoint_saved
        } else {
            None
        },
        version: job.version,
        at_ms: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(to: JobStatus) -> StatusEvent {
        StatusEvent {
            event_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            cluster: "c1".into(),
            from: JobStatus::Pending,
            to,
            reason: None,
            checkpoint_saved: None,
            version: 2,
            at_ms: 0,
        }
    }

    #[test]
    fn test_in_memory_sink_is_bounded() {
        let mut sink = InMemoryEventSink::new(2);
        sink.record(event(JobStatus::Queued));
        sink.record(event(JobStatus::Admitted));
        sink.record(event(JobStatus::Running));
        let kept: Vec<_> = sink.events().into_iter().map(|e| e.to).collect();
        assert_eq!(kept, vec![JobStatus::Admitted, JobStatus::Running]);
    }

    #[test]
    fn test_subscribers_receive_in_order() {
        let bus = EventBus::new(8);
        let rx = bus.subscribe();
        bus.publish(event(JobStatus::Queued));
        bus.publish(event(JobStatus::Cancelled));
        assert_eq!(rx.try_recv().map(|e| e.to), Ok(JobStatus::Queued));
        assert_eq!(rx.try_recv().map(|e| e.to), Ok(JobStatus::Cancelled));
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.recent().len(), 2);
    }

    #[test]
    fn test_dropped_subscriber_is_harmless() {
        let bus = EventBus::new(8);
        drop(bus.subscribe());
        bus.publish(event(JobStatus::Queued));
        assert_eq!(bus.recent().len(), 1);
    }
}
