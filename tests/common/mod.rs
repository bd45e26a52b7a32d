//! Common test utilities for notification center integration tests.

pub mod fakes;
pub mod mock_transport;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use salon_push::push::Notification;

pub use fakes::{FakeSystemNotifier, RecordingPorts, ScriptedApi};
pub use mock_transport::{MockTransport, MockTransportFactory};

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Let spawned tasks run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

pub fn notification(id: &str, kind: &str, store_id: &str, minute: u32) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: "u1".to_string(),
        store_id: store_id.to_string(),
        title: format!("Title {id}"),
        message: format!("Message {id}"),
        kind: kind.to_string(),
        is_read: false,
        created_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, minute, 0).unwrap(),
        metadata: None,
    }
}

pub fn notification_json(n: &Notification) -> String {
    serde_json::to_string(n).unwrap()
}
