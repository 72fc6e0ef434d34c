//! Background push handling. This context runs detached from any page and
//! cannot reload itself, so it never caches the profile: every event reads
//! the record straight from storage.

use std::sync::Arc;

use crate::config::PROFILE_STORE_KEY;
use crate::push::{Notification, NotificationHost, PushError, PushManager, PushSubscription, SubscribeOptions};
use crate::storage::Storage;
use crate::store;

pub struct ServiceWorker<N> {
    storage: Arc<dyn Storage>,
    key: String,
    notifications: N,
}

impl<N: NotificationHost> ServiceWorker<N> {
    pub fn new(storage: impl Storage + 'static, notifications: N) -> Self {
        Self {
            storage: Arc::new(storage),
            key: PROFILE_STORE_KEY.to_string(),
            notifications,
        }
    }

    /// The push service dropped or rotated the subscription: subscribe again
    /// with the stored server key.
    pub async fn on_push_subscription_change<P: PushManager>(
        &self,
        push: &P,
    ) -> Result<PushSubscription, PushError> {
        let public_key = store::read_profile(self.storage.as_ref(), &self.key)
            .and_then(|profile| profile.server_info)
            .map(|server_info| server_info.public_key)
            .ok_or(PushError::MissingServerKey)?;

        tracing::info!("Push subscription changed, resubscribing");
        push.subscribe(SubscribeOptions::user_visible(public_key)).await
    }

    pub fn on_push(&self, data: &str) -> Result<Notification, PushError> {
        let notification = Notification::from_push_data(data)?;
        self.notifications.show_notification(&notification)?;
        Ok(notification)
    }

    pub fn on_notification_click(&self, notification: &Notification) -> Result<(), PushError> {
        let result = match notification.click_url() {
            Some(url) => self.notifications.open_window(url),
            None => Err(PushError::MissingClickTarget),
        };
        self.notifications.close_notification(notification);
        result
    }
}
