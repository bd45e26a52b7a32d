//! Payload types carried by the event stream and the notifications REST API.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Notification types that change appointment data shown elsewhere.
pub const APPOINTMENT_LIFECYCLE_TYPES: &[&str] = &[
    "appointment_created",
    "appointment_cancelled",
    "appointment_status_changed",
];

/// A persisted, user-visible notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub store_id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Notification {
    pub fn is_appointment_lifecycle(&self) -> bool {
        APPOINTMENT_LIFECYCLE_TYPES.contains(&self.kind.as_str())
    }
}

/// A lightweight signal that some store activity happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub store_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Visual variant used when showing a toast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    #[default]
    Default,
    Success,
    Info,
    Warning,
    Destructive,
}

impl ToastVariant {
    /// Fixed type-to-variant mapping; unknown types get [`ToastVariant::Default`].
    pub fn for_kind(kind: &str) -> Self {
        match kind {
            "appointment_created" | "payment_received" => ToastVariant::Success,
            "appointment_cancelled" | "payment_failed" => ToastVariant::Destructive,
            "appointment_status_changed" | "appointment_rescheduled" | "review_received" => {
                ToastVariant::Info
            }
            "appointment_reminder" | "low_stock" => ToastVariant::Warning,
            _ => ToastVariant::Default,
        }
    }
}

impl fmt::Display for ToastVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToastVariant::Default => write!(f, "default"),
            ToastVariant::Success => write!(f, "success"),
            ToastVariant::Info => write!(f, "info"),
            ToastVariant::Warning => write!(f, "warning"),
            ToastVariant::Destructive => write!(f, "destructive"),
        }
    }
}

/// Cached query families the dispatcher can mark stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CacheDomain {
    #[serde(rename = "appointments")]
    Appointments,
    #[serde(rename = "dashboard-stats")]
    DashboardStats,
    #[serde(rename = "activities")]
    Activities,
}

impl CacheDomain {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheDomain::Appointments => "appointments",
            CacheDomain::DashboardStats => "dashboard-stats",
            CacheDomain::Activities => "activities",
        }
    }
}

impl fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named events the server pushes on the stream.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Notification(Notification),
    Activity(ActivityEvent),
}

impl PushEvent {
    /// Decode a named stream event. Returns `Ok(None)` for event names this
    /// client does not handle.
    pub fn decode(name: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        match name {
            "notification" => Ok(Some(PushEvent::Notification(serde_json::from_str(data)?))),
            "activity" => Ok(Some(PushEvent::Activity(serde_json::from_str(data)?))),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    const NOTIFICATION_JSON: &str = r#"{
        "id": "n1",
        "userId": "u1",
        "storeId": "S1",
        "title": "New booking",
        "message": "Jane booked a haircut",
        "type": "appointment_created",
        "isRead": false,
        "createdAt": "2026-10-19T09:30:00Z",
        "metadata": {"appointmentId": "a1"}
    }"#;

    #[test]
    fn decodes_notification_event() {
        let event = PushEvent::decode("notification", NOTIFICATION_JSON)
            .unwrap()
            .unwrap();
        let PushEvent::Notification(n) = event else {
            panic!("expected notification");
        };
        assert_eq!(n.id, "n1");
        assert_eq!(n.store_id, "S1");
        assert_eq!(n.kind, "appointment_created");
        assert!(!n.is_read);
        assert!(n.is_appointment_lifecycle());
        assert_eq!(n.metadata.unwrap()["appointmentId"], "a1");
    }

    #[test]
    fn missing_is_read_defaults_to_unread() {
        let json = r#"{"id":"n2","userId":"u1","storeId":"S1","title":"t","message":"m",
            "type":"review_received","createdAt":"2026-10-19T09:30:00Z"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert!(!n.is_read);
        assert!(n.metadata.is_none());
        assert!(!n.is_appointment_lifecycle());
    }

    #[test]
    fn decodes_activity_event() {
        let json = r#"{"id":"a1","storeId":"S2","type":"customer_checked_in",
            "message":"Checked in","createdAt":"2026-10-19T10:00:00Z"}"#;
        let event = PushEvent::decode("activity", json).unwrap().unwrap();
        assert!(matches!(event, PushEvent::Activity(ref a) if a.store_id == "S2"));
    }

    #[test]
    fn unknown_event_names_are_skipped() {
        assert_eq!(PushEvent::decode("presence", "{}").unwrap(), None);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(PushEvent::decode("notification", "{\"id\": 1}").is_err());
    }

    #[test]
    fn toast_variant_mapping() {
        assert_eq!(ToastVariant::for_kind("appointment_created"), ToastVariant::Success);
        assert_eq!(ToastVariant::for_kind("appointment_cancelled"), ToastVariant::Destructive);
        assert_eq!(ToastVariant::for_kind("appointment_status_changed"), ToastVariant::Info);
        assert_eq!(ToastVariant::for_kind("appointment_reminder"), ToastVariant::Warning);
        assert_eq!(ToastVariant::for_kind("something_new"), ToastVariant::Default);
    }

    #[test]
    fn cache_domain_names() {
        assert_eq!(CacheDomain::Appointments.to_string(), "appointments");
        assert_eq!(CacheDomain::DashboardStats.to_string(), "dashboard-stats");
        assert_eq!(
            serde_json::to_string(&CacheDomain::Activities).unwrap(),
            "\"activities\""
        );
    }
}
