//! In-memory notification list with read/unread state.
//!
//! Read-state changes are confirmation-first: the REST call has to succeed
//! before the local entry flips. Only the dispatcher inserts and only the
//! store's own mark-read operations update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::types::Notification;
use crate::api::NotificationApi;

/// Result of inserting a pushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// New id, prepended.
    Inserted,
    /// Known id and the pushed copy is newer; replaced in place.
    Replaced,
    /// Known id and the pushed copy is not newer; ignored.
    Duplicate,
}

/// Marker returned by [`NotificationStore::begin_resync`]. Entries pushed after
/// it was taken survive a snapshot that does not contain them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncMarker(u64);

struct Entry {
    notification: Notification,
    seq: u64,
}

#[derive(Default)]
struct StoreInner {
    entries: Vec<Entry>,
    seq: u64,
}

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    inner: RwLock<StoreInner>,
    max_len: Option<usize>,
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>, max_len: Option<usize>) -> Self {
        Self {
            api,
            inner: RwLock::new(StoreInner::default()),
            max_len,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current list, most recent first.
    pub fn snapshot(&self) -> Vec<Notification> {
        self.read()
            .entries
            .iter()
            .map(|e| e.notification.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Notification> {
        self.read()
            .entries
            .iter()
            .find(|e| e.notification.id == id)
            .map(|e| e.notification.clone())
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Derived on every call from the current list.
    pub fn unread_count(&self) -> usize {
        self.read()
            .entries
            .iter()
            .filter(|e| !e.notification.is_read)
            .count()
    }

    /// Insert a pushed notification at the front, deduplicating by id.
    pub fn prepend(&self, notification: Notification) -> InsertOutcome {
        let mut inner = self.write();

        if let Some(existing) = inner
            .entries
            .iter_mut()
            .find(|e| e.notification.id == notification.id)
        {
            if notification.created_at > existing.notification.created_at {
                existing.notification = notification;
                return InsertOutcome::Replaced;
            }
            return InsertOutcome::Duplicate;
        }

        inner.seq += 1;
        let seq = inner.seq;
        inner.entries.insert(0, Entry { notification, seq });
        if let Some(max) = self.max_len {
            inner.entries.truncate(max);
        }
        InsertOutcome::Inserted
    }

    /// Take a marker before starting a resync fetch.
    pub fn begin_resync(&self) -> ResyncMarker {
        ResyncMarker(self.read().seq)
    }

    /// Replace the list with a fetched snapshot.
    ///
    /// Entries pushed after `marker` and missing from the snapshot stay at the
    /// front. For ids present in both, the copy with the later `created_at`
    /// wins; on a tie the fetched copy wins.
    pub fn replace_with_snapshot(&self, marker: ResyncMarker, fetched: Vec<Notification>) {
        let mut inner = self.write();

        let mut local_newer: HashMap<String, Notification> = HashMap::new();
        let mut kept_pushes = Vec::new();
        let fetched_ids: HashSet<&str> = fetched.iter().map(|n| n.id.as_str()).collect();

        for entry in inner.entries.drain(..) {
            if fetched_ids.contains(entry.notification.id.as_str()) {
                local_newer.insert(entry.notification.id.clone(), entry.notification);
            } else if entry.seq > marker.0 {
                kept_pushes.push(entry);
            }
        }
        drop(fetched_ids);

        let base_seq = marker.0;
        let mut merged = kept_pushes;
        let mut seen: HashSet<String> = merged
            .iter()
            .map(|e| e.notification.id.clone())
            .collect();

        for notification in fetched {
            if !seen.insert(notification.id.clone()) {
                continue;
            }
            let chosen = match local_newer.remove(&notification.id) {
                Some(local) if local.created_at > notification.created_at => local,
                _ => notification,
            };
            merged.push(Entry {
                notification: chosen,
                seq: base_seq,
            });
        }

        if let Some(max) = self.max_len {
            merged.truncate(max);
        }

        debug!(
            "Applied notification snapshot: {} entries, {} unread",
            merged.len(),
            merged.iter().filter(|e| !e.notification.is_read).count()
        );
        inner.entries = merged;
    }

    /// Drop everything (session ended).
    pub fn clear(&self) {
        self.write().entries.clear();
    }

    /// Persist read state for one notification, then flip it locally.
    ///
    /// Failures are logged and leave local state untouched, so the call can be
    /// retried.
    pub async fn mark_as_read(&self, id: &str) {
        if let Err(e) = self.api.mark_read(id).await {
            warn!("Failed to mark notification {} as read: {}", id, e);
            return;
        }

        let mut inner = self.write();
        match inner.entries.iter_mut().find(|e| e.notification.id == id) {
            Some(entry) => entry.notification.is_read = true,
            None => debug!("Notification {} marked read remotely but not held locally", id),
        }
    }

    /// Persist read state for everything, then flip every local entry.
    pub async fn mark_all_as_read(&self) {
        if let Err(e) = self.api.mark_all_read().await {
            warn!("Failed to mark all notifications as read: {}", e);
            return;
        }

        let mut inner = self.write();
        for entry in inner.entries.iter_mut() {
            entry.notification.is_read = true;
        }
        info!("Marked {} notifications as read", inner.entries.len());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::ApiError;

    #[derive(Default)]
    struct CountingApi {
        mark_read_calls: AtomicUsize,
        mark_all_calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl NotificationApi for CountingApi {
        async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
            Ok(Vec::new())
        }

        async fn mark_read(&self, _id: &str) -> Result<(), ApiError> {
            self.mark_read_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Request("offline".to_string()));
            }
            Ok(())
        }

        async fn mark_all_read(&self) -> Result<(), ApiError> {
            self.mark_all_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Request("offline".to_string()));
            }
            Ok(())
        }
    }

    fn notification(id: &str, minute: u32, is_read: bool) -> Notification {
        Notification {
            id: id.to_string(),
            user_id: "u1".to_string(),
            store_id: "S1".to_string(),
            title: format!("title {id}"),
            message: format!("message {id}"),
            kind: "review_received".to_string(),
            is_read,
            created_at: Utc.with_ymd_and_hms(2026, 10, 19, 9, minute, 0).unwrap(),
            metadata: None,
        }
    }

    fn ids(store: &NotificationStore) -> Vec<String> {
        store.snapshot().into_iter().map(|n| n.id).collect()
    }

    fn store_with(api: Arc<CountingApi>, max_len: Option<usize>) -> NotificationStore {
        NotificationStore::new(api, max_len)
    }

    #[test]
    fn pushes_are_most_recent_first_with_consistent_unread_count() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        for i in 0..10 {
            let outcome = store.prepend(notification(&format!("n{i}"), i, i % 3 == 0));
            assert_eq!(outcome, InsertOutcome::Inserted);
        }

        let list = store.snapshot();
        assert_eq!(list.len(), 10);
        assert_eq!(list[0].id, "n9");
        assert_eq!(list[9].id, "n0");
        assert_eq!(
            store.unread_count(),
            list.iter().filter(|n| !n.is_read).count()
        );
        assert_eq!(store.unread_count(), 6);
    }

    #[test]
    fn duplicate_push_is_ignored_unless_newer() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        store.prepend(notification("n1", 5, false));
        store.prepend(notification("n2", 6, false));

        assert_eq!(store.prepend(notification("n1", 5, false)), InsertOutcome::Duplicate);
        assert_eq!(store.len(), 2);

        let mut newer = notification("n1", 7, false);
        newer.title = "updated".to_string();
        assert_eq!(store.prepend(newer), InsertOutcome::Replaced);
        assert_eq!(ids(&store), vec!["n2", "n1"]);
        assert_eq!(store.get("n1").unwrap().title, "updated");
    }

    #[test]
    fn cap_drops_oldest_entries() {
        let store = store_with(Arc::new(CountingApi::default()), Some(3));
        for i in 0..5 {
            store.prepend(notification(&format!("n{i}"), i, false));
        }
        assert_eq!(ids(&store), vec!["n4", "n3", "n2"]);
    }

    #[test]
    fn snapshot_replaces_list_and_trusts_server_read_state() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        store.prepend(notification("n1", 1, true));
        store.prepend(notification("stale", 2, false));

        let marker = store.begin_resync();
        store.replace_with_snapshot(
            marker,
            vec![notification("n2", 3, false), notification("n1", 1, false)],
        );

        assert_eq!(ids(&store), vec!["n2", "n1"]);
        assert!(!store.get("n1").unwrap().is_read);
        assert_eq!(store.unread_count(), 2);
    }

    #[test]
    fn push_during_resync_survives_snapshot_without_duplicates() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        store.prepend(notification("n1", 1, false));

        let marker = store.begin_resync();
        store.prepend(notification("n3", 3, false));
        store.prepend(notification("n2", 2, false));

        // The fetch already includes n2 but not n3.
        store.replace_with_snapshot(
            marker,
            vec![notification("n2", 2, false), notification("n1", 1, false)],
        );

        assert_eq!(ids(&store), vec!["n3", "n2", "n1"]);
    }

    #[test]
    fn snapshot_keeps_newer_local_copy() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        let marker = store.begin_resync();
        let mut local = notification("n1", 1, false);
        local.created_at = local.created_at + Duration::minutes(10);
        local.title = "local".to_string();
        store.prepend(local);

        store.replace_with_snapshot(marker, vec![notification("n1", 1, false)]);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("n1").unwrap().title, "local");
    }

    #[test]
    fn clear_empties_store() {
        let store = store_with(Arc::new(CountingApi::default()), None);
        store.prepend(notification("n1", 1, false));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.unread_count(), 0);
    }

    #[tokio::test]
    async fn mark_as_read_is_idempotent() {
        let api = Arc::new(CountingApi::default());
        let store = store_with(api.clone(), None);
        store.prepend(notification("n1", 1, false));
        store.prepend(notification("n2", 2, false));

        store.mark_as_read("n1").await;
        assert!(store.get("n1").unwrap().is_read);
        assert_eq!(store.unread_count(), 1);

        store.mark_as_read("n1").await;
        assert_eq!(api.mark_read_calls.load(Ordering::SeqCst), 2);
        assert!(store.get("n1").unwrap().is_read);
        assert_eq!(store.unread_count(), 1);
    }

    #[tokio::test]
    async fn failed_mark_as_read_leaves_state_unchanged() {
        let api = Arc::new(CountingApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let store = store_with(api.clone(), None);
        store.prepend(notification("n1", 1, false));

        store.mark_as_read("n1").await;
        assert!(!store.get("n1").unwrap().is_read);

        api.fail.store(false, Ordering::SeqCst);
        store.mark_as_read("n1").await;
        assert!(store.get("n1").unwrap().is_read);
        assert_eq!(api.mark_read_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mark_all_as_read_uses_one_request() {
        let api = Arc::new(CountingApi::default());
        let store = store_with(api.clone(), None);
        for i in 0..4 {
            store.prepend(notification(&format!("n{i}"), i, false));
        }

        store.mark_all_as_read().await;

        assert_eq!(api.mark_all_calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.unread_count(), 0);
    }

    #[tokio::test]
    async fn failed_mark_all_as_read_keeps_unread() {
        let api = Arc::new(CountingApi::default());
        api.fail.store(true, Ordering::SeqCst);
        let store = store_with(api.clone(), None);
        store.prepend(notification("n1", 1, false));

        store.mark_all_as_read().await;

        assert_eq!(store.unread_count(), 1);
    }
}
