//! Flow events and the event bus that UI layers subscribe to.
//!
//! The contextualization service publishes one [`FlowEvent`] per phase
//! transition of every flow it runs. Consumers (a UI shell, the CLI, log
//! shippers) subscribe independently and never need a callback threaded
//! through to the code that owns the flow.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Versioned wrapper around a [`FlowEvent`].
///
/// ## Wire Format
///
/// ```text
/// {"event_id":"...","event_type":"flow.progress","occurred_at":"...","payload_version":1,"payload":{...}}
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    /// Unique event identifier (UUIDv7 for temporal ordering).
    pub event_id: Uuid,
    /// Namespaced event type (e.g., `"flow.started"`).
    pub event_type: String,
    /// When the event occurred (UTC).
    pub occurred_at: DateTime<Utc>,
    /// Payload schema version.
    pub payload_version: u32,
    pub payload: FlowEvent,
}

impl EventEnvelope {
    pub fn new(event: FlowEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            event_type: event.namespaced_event_type().to_string(),
            occurred_at: Utc::now(),
            payload_version: 1,
            payload: event,
        }
    }
}

/// Lifecycle of a contextualization flow.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"FlowProgress","flow_id":"...","message":"Processing File"}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum FlowEvent {
    /// A flow was started for a source file.
    FlowStarted {
        flow_id: Uuid,
        flow: String,
        file_id: i64,
    },
    /// A remote job was accepted.
    JobSubmitted {
        flow_id: Uuid,
        job_kind: String,
        job_id: String,
    },
    /// Human-readable progress.
    FlowProgress { flow_id: Uuid, message: String },
    /// The flow finished successfully.
    FlowCompleted {
        flow_id: Uuid,
        #[serde(skip_serializing_if = "Option::is_none")]
        derived_file_id: Option<i64>,
        duration_ms: u64,
    },
    /// The flow ended with an error.
    FlowFailed { flow_id: Uuid, error: String },
    /// The initiator cancelled the flow.
    FlowCancelled { flow_id: Uuid },
}

impl FlowEvent {
    /// Namespaced event type for the envelope (e.g., `"flow.progress"`).
    pub fn namespaced_event_type(&self) -> &'static str {
        match self {
            FlowEvent::FlowStarted { .. } => "flow.started",
            FlowEvent::JobSubmitted { .. } => "job.submitted",
            FlowEvent::FlowProgress { .. } => "flow.progress",
            FlowEvent::FlowCompleted { .. } => "flow.completed",
            FlowEvent::FlowFailed { .. } => "flow.failed",
            FlowEvent::FlowCancelled { .. } => "flow.cancelled",
        }
    }

    pub fn flow_id(&self) -> Uuid {
        match self {
            FlowEvent::FlowStarted { flow_id, .. }
            | FlowEvent::JobSubmitted { flow_id, .. }
            | FlowEvent::FlowProgress { flow_id, .. }
            | FlowEvent::FlowCompleted { flow_id, .. }
            | FlowEvent::FlowFailed { flow_id, .. }
            | FlowEvent::FlowCancelled { flow_id } => *flow_id,
        }
    }

    /// True for events after which the flow emits nothing else.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowEvent::FlowCompleted { .. }
                | FlowEvent::FlowFailed { .. }
                | FlowEvent::FlowCancelled { .. }
        )
    }
}

/// Broadcast-based event bus.
///
/// Slow receivers that fall behind get a `Lagged` error and miss events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Recommended: 256 for production, 32 for tests.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Emit an event to all subscribers. Dropped silently when nobody listens.
    pub fn emit(&self, event: FlowEvent) {
        let envelope = EventEnvelope::new(event);
        let subscriber_count = self.tx.receiver_count();
        tracing::debug!(
            event_type = %envelope.event_type,
            event_id = %envelope.event_id,
            subscriber_count,
            "EventBus emit"
        );
        let _ = self.tx.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}
