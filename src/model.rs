use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Notification priority class. The claim order is High, then Medium, then
/// Low; `rank()` is the numeric sort key used by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Low => "LOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HIGH" => Some(Priority::High),
            "MEDIUM" => Some(Priority::Medium),
            "LOW" => Some(Priority::Low),
            _ => None,
        }
    }

    /// Claim ordering key: lower rank is claimed first.
    pub fn rank(&self) -> i16 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    /// Derive the priority for an incoming event type. The mapping is
    /// normative; the `priority` field on the bus message is not trusted.
    /// Unknown event types default to Medium.
    pub fn for_event_type(event_type: &str) -> Priority {
        match EventKind::parse(event_type) {
            Some(kind) => kind.priority(),
            None => Priority::Medium,
        }
    }
}

/// Known notification event kinds. Unknown kinds still flow through the
/// system (the row keeps the raw `event_type` string); this enum exists for
/// the priority mapping and UI-facing typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    JobNew,
    JobUpdate,
    JobApplicationStatus,
    JobApplicationViewed,
    ConnectionRequest,
    ConnectionAccepted,
    ConnectionEndorsed,
    FollowerNew,
    FollowerContentLiked,
    FollowerContentCommented,
}

impl EventKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "job.new" => Some(EventKind::JobNew),
            "job.update" => Some(EventKind::JobUpdate),
            "job.application_status" => Some(EventKind::JobApplicationStatus),
            "job.application_viewed" => Some(EventKind::JobApplicationViewed),
            "connection.request" => Some(EventKind::ConnectionRequest),
            "connection.accepted" => Some(EventKind::ConnectionAccepted),
            "connection.endorsed" => Some(EventKind::ConnectionEndorsed),
            "follower.new" => Some(EventKind::FollowerNew),
            "follower.content_liked" => Some(EventKind::FollowerContentLiked),
            "follower.content_commented" => Some(EventKind::FollowerContentCommented),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobNew => "job.new",
            EventKind::JobUpdate => "job.update",
            EventKind::JobApplicationStatus => "job.application_status",
            EventKind::JobApplicationViewed => "job.application_viewed",
            EventKind::ConnectionRequest => "connection.request",
            EventKind::ConnectionAccepted => "connection.accepted",
            EventKind::ConnectionEndorsed => "connection.endorsed",
            EventKind::FollowerNew => "follower.new",
            EventKind::FollowerContentLiked => "follower.content_liked",
            EventKind::FollowerContentCommented => "follower.content_commented",
        }
    }

    /// Job events are urgent, connection events moderately important,
    /// follower activity is background noise.
    pub fn priority(&self) -> Priority {
        match self {
            EventKind::JobNew | EventKind::JobUpdate | EventKind::JobApplicationStatus => {
                Priority::High
            }
            EventKind::ConnectionRequest
            | EventKind::ConnectionAccepted
            | EventKind::JobApplicationViewed => Priority::Medium,
            EventKind::FollowerNew
            | EventKind::FollowerContentLiked
            | EventKind::FollowerContentCommented
            | EventKind::ConnectionEndorsed => Priority::Low,
        }
    }
}

/// Authoritative lifecycle state of a notification row.
///
/// ```text
/// pending --claim--> claimed --push ok--> pushed   (terminal)
///                           \--push err--> failed  (terminal)
///                           \--lease expired--> pending (retry_count += 1)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Claimed,
    Pushed,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Pending => "pending",
            NotificationStatus::Claimed => "claimed",
            NotificationStatus::Pushed => "pushed",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NotificationStatus::Pending),
            "claimed" => Some(NotificationStatus::Claimed),
            "pushed" => Some(NotificationStatus::Pushed),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

/// Event metadata attached by the producing service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventMetadata {
    #[serde(default)]
    pub source_service: String,
    #[serde(default)]
    pub trace_id: String,
}

/// Wire format of a notification event on the log bus, JSON-encoded and
/// partitioned by `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub event_id: String,
    pub event_type: String,
    /// Producer-declared priority. Deserialized for diagnostics only; the
    /// ingestor derives the effective priority from `event_type`.
    #[serde(default)]
    pub priority: Option<String>,
    pub user_id: String,
    pub event_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: HashMap<String, String>,
    #[serde(default)]
    pub metadata: EventMetadata,
}

/// One notification row as held by the store.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub event_type: String,
    pub priority: Priority,
    pub status: NotificationStatus,
    pub payload: HashMap<String, String>,
    pub event_ts: DateTime<Utc>,
    pub received_ts: DateTime<Utc>,
    pub delivered_ts: Option<DateTime<Utc>>,
    pub owner_id: Option<String>,
    pub lease_deadline: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub created_ts: DateTime<Utc>,
}

impl Notification {
    /// Build a fresh `pending` row from a bus event.
    ///
    /// The row id is derived deterministically from the producer's
    /// `event_id`, so a redelivered bus message (crash-rewind, auto-commit
    /// replay) collides on insert and is rejected by the store instead of
    /// becoming a second row.
    pub fn from_bus_event(event: BusEvent, received_ts: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, event.event_id.as_bytes()),
            priority: Priority::for_event_type(&event.event_type),
            user_id: event.user_id,
            event_type: event.event_type,
            status: NotificationStatus::Pending,
            payload: event.payload,
            event_ts: event.event_timestamp,
            received_ts,
            delivered_ts: None,
            owner_id: None,
            lease_deadline: None,
            retry_count: 0,
            last_error: None,
            created_ts: received_ts,
        }
    }
}

/// Claim projection: the minimum a delivery worker needs to fan out one
/// notification, returned by the store's claim operation.
#[derive(Debug, Clone)]
pub struct ClaimedNotification {
    pub id: Uuid,
    pub user_id: String,
    pub event_type: String,
    pub priority: Priority,
    pub payload: HashMap<String, String>,
    pub event_ts: DateTime<Utc>,
    pub received_ts: DateTime<Utc>,
}

impl ClaimedNotification {
    pub fn frame(&self) -> NotificationFrame<'_> {
        NotificationFrame {
            id: self.id,
            event_type: &self.event_type,
            priority: self.priority,
            event_ts: self.event_ts,
            payload: &self.payload,
        }
    }
}

/// Body of a `notification` SSE frame.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationFrame<'a> {
    pub id: Uuid,
    pub event_type: &'a str,
    pub priority: Priority,
    pub event_ts: DateTime<Utc>,
    pub payload: &'a HashMap<String, String>,
}

/// Delivery outcome reported back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pushed,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pushed => "pushed",
            DeliveryStatus::Failed => "failed",
        }
    }
}

/// In-flight status change flowing from delivery workers to the flusher.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub id: Uuid,
    pub status: DeliveryStatus,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn pushed(id: Uuid) -> Self {
        Self {
            id,
            status: DeliveryStatus::Pushed,
            error: None,
        }
    }

    pub fn failed(id: Uuid, error: impl Into<String>) -> Self {
        Self {
            id,
            status: DeliveryStatus::Failed,
            error: Some(error.into()),
        }
    }
}

/// Per-status row counts, logged periodically by the scheduler.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub pending: i64,
    pub claimed: i64,
    pub pushed: i64,
    pub failed: i64,
    pub total: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_mapping_matches_event_kinds() {
        for (event_type, expected) in [
            ("job.new", Priority::High),
            ("job.update", Priority::High),
            ("job.application_status", Priority::High),
            ("connection.request", Priority::Medium),
            ("connection.accepted", Priority::Medium),
            ("job.application_viewed", Priority::Medium),
            ("follower.new", Priority::Low),
            ("follower.content_liked", Priority::Low),
            ("follower.content_commented", Priority::Low),
            ("connection.endorsed", Priority::Low),
        ] {
            assert_eq!(Priority::for_event_type(event_type), expected, "{event_type}");
        }
    }

    #[test]
    fn unknown_event_type_defaults_to_medium() {
        assert_eq!(Priority::for_event_type("billing.invoice"), Priority::Medium);
        assert_eq!(Priority::for_event_type(""), Priority::Medium);
    }

    #[test]
    fn priority_rank_orders_high_first() {
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            NotificationStatus::Pending,
            NotificationStatus::Claimed,
            NotificationStatus::Pushed,
            NotificationStatus::Failed,
        ] {
            assert_eq!(NotificationStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(NotificationStatus::parse("not_pushed"), None);
    }

    #[test]
    fn bus_event_parses_producer_json() {
        let raw = r#"{
            "event_id": "evt-123",
            "event_type": "job.new",
            "priority": "HIGH",
            "user_id": "user_u1",
            "event_timestamp": "2025-11-04T10:15:30Z",
            "payload": {"job_title": "Staff Engineer"},
            "metadata": {"source_service": "job-service", "trace_id": "trace-9"}
        }"#;

        let event: BusEvent = serde_json::from_str(raw).expect("valid bus event");
        assert_eq!(event.event_id, "evt-123");
        assert_eq!(event.user_id, "user_u1");
        assert_eq!(event.payload["job_title"], "Staff Engineer");
        assert_eq!(event.metadata.source_service, "job-service");
    }

    #[test]
    fn bus_event_tolerates_missing_optional_fields() {
        let raw = r#"{
            "event_id": "evt-1",
            "event_type": "follower.new",
            "user_id": "u2",
            "event_timestamp": "2025-11-04T10:15:30Z"
        }"#;

        let event: BusEvent = serde_json::from_str(raw).expect("minimal bus event");
        assert!(event.payload.is_empty());
        assert!(event.priority.is_none());
    }

    #[test]
    fn from_bus_event_creates_pending_row_with_derived_priority() {
        let event: BusEvent = serde_json::from_str(
            r#"{
                "event_id": "evt-2",
                "event_type": "job.new",
                "priority": "LOW",
                "user_id": "u3",
                "event_timestamp": "2025-11-04T10:15:30Z",
                "payload": {"k": "v"}
            }"#,
        )
        .unwrap();

        let now = Utc::now();
        let row = Notification::from_bus_event(event, now);

        assert_eq!(row.status, NotificationStatus::Pending);
        // The wire priority says LOW but job.new is normatively HIGH.
        assert_eq!(row.priority, Priority::High);
        assert_eq!(row.retry_count, 0);
        assert_eq!(row.received_ts, now);
        assert!(row.owner_id.is_none());
    }

    #[test]
    fn redelivered_event_maps_to_the_same_row_id() {
        let event = |ts| {
            let raw = r#"{
                "event_id": "evt-same",
                "event_type": "job.new",
                "user_id": "u1",
                "event_timestamp": "2025-11-04T10:15:30Z"
            }"#;
            let parsed: BusEvent = serde_json::from_str(raw).unwrap();
            Notification::from_bus_event(parsed, ts)
        };

        let first = event(Utc::now());
        let second = event(Utc::now());
        assert_eq!(first.id, second.id, "same event_id, same dedup key");

        let other: BusEvent = serde_json::from_str(
            r#"{
                "event_id": "evt-other",
                "event_type": "job.new",
                "user_id": "u1",
                "event_timestamp": "2025-11-04T10:15:30Z"
            }"#,
        )
        .unwrap();
        assert_ne!(first.id, Notification::from_bus_event(other, Utc::now()).id);
    }

    #[test]
    fn notification_frame_serializes_expected_fields() {
        let claimed = ClaimedNotification {
            id: Uuid::nil(),
            user_id: "u1".into(),
            event_type: "job.new".into(),
            priority: Priority::High,
            payload: HashMap::from([("a".to_string(), "b".to_string())]),
            event_ts: "2025-11-04T10:15:30Z".parse().unwrap(),
            received_ts: Utc::now(),
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&claimed.frame()).unwrap()).unwrap();

        assert_eq!(json["event_type"], "job.new");
        assert_eq!(json["priority"], "HIGH");
        assert_eq!(json["payload"]["a"], "b");
        assert!(json.get("user_id").is_none(), "frame must not leak user_id");
    }
}
