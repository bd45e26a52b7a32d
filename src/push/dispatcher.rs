//! Classifies pushed events and fans them out to the store and the ports.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, trace};

use super::ports::{
    should_show_system_notification, CacheInvalidationPort, ClickHandler, Notifier, SystemNotifier,
};
use super::store::{InsertOutcome, NotificationStore};
use super::types::{ActivityEvent, CacheDomain, Notification, PushEvent, ToastVariant};
use crate::config::DEFAULT_ACTIVITY_BUFFER_SIZE;

#[derive(Default)]
struct Latest {
    notification: Option<Notification>,
    activity: Option<ActivityEvent>,
    recent_activities: VecDeque<ActivityEvent>,
}

/// Handles events one at a time, in the order they are handed over.
pub struct EventDispatcher {
    store: Arc<NotificationStore>,
    cache: Arc<dyn CacheInvalidationPort>,
    notifier: Arc<dyn Notifier>,
    system: Arc<dyn SystemNotifier>,
    latest: RwLock<Latest>,
    activity_cap: usize,
}

impl EventDispatcher {
    pub fn new(
        store: Arc<NotificationStore>,
        cache: Arc<dyn CacheInvalidationPort>,
        notifier: Arc<dyn Notifier>,
        system: Arc<dyn SystemNotifier>,
    ) -> Self {
        Self {
            store,
            cache,
            notifier,
            system,
            latest: RwLock::new(Latest::default()),
            activity_cap: DEFAULT_ACTIVITY_BUFFER_SIZE,
        }
    }

    pub fn with_activity_cap(mut self, cap: usize) -> Self {
        self.activity_cap = cap.max(1);
        self
    }

    pub fn handle(&self, event: PushEvent) {
        match event {
            PushEvent::Notification(notification) => self.on_notification(notification),
            PushEvent::Activity(activity) => self.on_activity(activity),
        }
    }

    pub fn on_notification(&self, notification: Notification) {
        let outcome = self.store.prepend(notification.clone());
        if outcome == InsertOutcome::Duplicate {
            debug!("Ignoring duplicate notification {}", notification.id);
            return;
        }

        trace!(
            "Notification {} ({}) for store {}",
            notification.id,
            notification.kind,
            notification.store_id
        );
        self.latest
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .notification = Some(notification.clone());

        if outcome == InsertOutcome::Inserted {
            let variant = ToastVariant::for_kind(&notification.kind);
            self.notifier
                .show(&notification.title, &notification.message, variant);
            self.maybe_show_system(&notification);
        }

        if notification.is_appointment_lifecycle() {
            self.cache
                .invalidate(CacheDomain::Appointments, &notification.store_id);
            self.cache
                .invalidate(CacheDomain::DashboardStats, &notification.store_id);
        }
    }

    pub fn on_activity(&self, activity: ActivityEvent) {
        trace!("Activity {} for store {}", activity.kind, activity.store_id);
        let store_id = activity.store_id.clone();

        {
            let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
            latest.recent_activities.push_front(activity.clone());
            latest.recent_activities.truncate(self.activity_cap);
            latest.activity = Some(activity);
        }

        self.cache.invalidate(CacheDomain::Activities, &store_id);
    }

    fn maybe_show_system(&self, notification: &Notification) {
        let show = should_show_system_notification(
            self.system.is_supported(),
            self.system.permission_state(),
            self.system.page_visibility(),
        );
        if !show {
            return;
        }

        let system = Arc::clone(&self.system);
        let on_click: ClickHandler = Box::new(move || system.focus_app());
        self.system
            .show(&notification.title, &notification.message, on_click);
    }

    pub fn latest_notification(&self) -> Option<Notification> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .notification
            .clone()
    }

    pub fn latest_activity(&self) -> Option<ActivityEvent> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .activity
            .clone()
    }

    /// Recent activities, most recent first.
    pub fn recent_activities(&self) -> Vec<ActivityEvent> {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .recent_activities
            .iter()
            .cloned()
            .collect()
    }

    /// Forget everything recorded for the previous session.
    pub fn reset(&self) {
        *self.latest.write().unwrap_or_else(PoisonError::into_inner) = Latest::default();
    }
}
