use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Append-only event type tags. New tags should only ever be added, never
/// renamed, since operators may grep historical audit/event logs for them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// `workflow.<status>` — payload is `{from, to}`.
    Workflow,
    WorkflowEscalation,
    SpecReviewStarted,
    SpecReviewIteration,
    SpecReviewFeedback,
    SpecReviewPassed,
    SpecReviewBlocked,
    SpecReviewMalformed,
    PrdDiscovered,
    PrCreated,
}

impl EventKind {
    /// The dotted string form used historically for `workflow.<status>` events.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Workflow => "workflow",
            EventKind::WorkflowEscalation => "workflow.escalation",
            EventKind::SpecReviewStarted => "spec.review.started",
            EventKind::SpecReviewIteration => "spec.review.iteration",
            EventKind::SpecReviewFeedback => "spec.review.feedback",
            EventKind::SpecReviewPassed => "spec.review.passed",
            EventKind::SpecReviewBlocked => "spec.review.blocked",
            EventKind::SpecReviewMalformed => "spec.review.malformed",
            EventKind::PrdDiscovered => "PRDDiscovered",
            EventKind::PrCreated => "PRCreated",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    /// For `Workflow`, the dotted name is `workflow.<to>`; carried separately
    /// here so subscribers don't have to re-derive it from the payload.
    pub name: String,
    pub prd_id: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Bounded in-memory publish/subscribe bus.
///
/// Backed by `tokio::sync::broadcast`, whose bounded ring buffer already
/// implements drop-oldest semantics for slow subscribers: once a subscriber
/// falls more than `capacity` sends behind, its next `recv` returns
/// `Lagged(n)` rather than blocking the publisher. `publish` therefore never
/// blocks and never takes any lock the caller might be holding, matching the
/// "publishing from inside a lock is permitted" requirement.
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Never blocks; if there are no subscribers the event
    /// is simply dropped.
    pub fn publish(&self, kind: EventKind, prd_id: impl Into<String>, payload: Value) {
        let name = match &kind {
            EventKind::Workflow => {
                let to = payload.get("to").and_then(Value::as_str).unwrap_or("?");
                format!("workflow.{to}")
            }
            other => other.as_str().to_string(),
        };
        let event = Event {
            kind,
            name: name.clone(),
            prd_id: prd_id.into(),
            payload,
            timestamp: Utc::now(),
        };
        trace!(event = %name, prd_id = %event.prd_id, "publishing event");
        // Err(SendError) only happens with zero subscribers; that is not a
        // failure condition for a publisher that doesn't care who's listening.
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(EventKind::PrdDiscovered, "feat-1", json!({"path": "a.md"}));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "PRDDiscovered");
        assert_eq!(event.prd_id, "feat-1");
    }

    #[tokio::test]
    async fn workflow_event_name_derives_dotted_status() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(
            EventKind::Workflow,
            "feat-1",
            json!({"from": "pending", "to": "generating_specs"}),
        );
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, "workflow.generating_specs");
    }

    #[tokio::test]
    async fn publish_never_blocks_with_no_subscribers() {
        let bus = Bus::new(1);
        bus.publish(EventKind::PrCreated, "feat-1", json!({}));
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking_publisher() {
        let bus = Bus::new(2);
        let mut rx = bus.subscribe();
        for i in 0..5 {
            bus.publish(EventKind::PrdDiscovered, "feat-1", json!({"i": i}));
        }
        // Buffer only holds 2; the lagged subscriber gets told how many it missed.
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, broadcast::error::RecvError::Lagged(_)));
    }
}
