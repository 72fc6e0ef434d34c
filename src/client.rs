use std::sync::Arc;
use thiserror::Error;

use crate::api::{ApiClient, ApiError};
use crate::profile::{ServerInfo, UserInfo};
use crate::push::{PushError, PushManager, PushSubscription, SubscribeOptions};
use crate::store::{ProfileStore, StoreError};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("User information not available")]
    NotRegistered,
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Push(#[from] PushError),
}

/// The user-facing operations. Each one reads the profile, talks to the
/// backend once, and writes the changed profile back through the store.
pub struct PingClient {
    store: Arc<ProfileStore>,
    api: ApiClient,
}

impl PingClient {
    pub fn new(store: Arc<ProfileStore>, api: ApiClient) -> Self {
        Self { store, api }
    }

    pub fn store(&self) -> &Arc<ProfileStore> {
        &self.store
    }

    /// Fetch the server's public key and ping cooldown and cache them in the
    /// profile.
    pub async fn fetch_server_information(&self) -> Result<ServerInfo, ClientError> {
        let server_info = self.api.fetch_info().await?.into_server_info()?;
        let stored = server_info.clone();
        self.store.update(move |profile| profile.server_info = Some(stored))?;
        tracing::info!(
            ping_cooldown = server_info.ping_cooldown_seconds,
            "Fetched server information"
        );
        Ok(server_info)
    }

    /// Subscribe to the push service with the server's key, fetching server
    /// information first when none is cached.
    pub async fn get_push_subscription<P: PushManager>(
        &self,
        push: &P,
    ) -> Result<PushSubscription, ClientError> {
        let server_info = match self.store.load()?.server_info {
            Some(server_info) => server_info,
            None => self.fetch_server_information().await?,
        };
        let subscription = push
            .subscribe(SubscribeOptions::user_visible(server_info.public_key))
            .await?;
        Ok(subscription)
    }

    pub async fn register_account(&self) -> Result<UserInfo, ClientError> {
        let user_info = UserInfo::from(self.api.register_user().await?);
        let stored = user_info.clone();
        self.store.update(move |profile| profile.user_info = Some(stored))?;
        tracing::info!(user_id = %user_info.user_id, country = %user_info.country.iso_code, "Registered account");
        Ok(user_info)
    }

    pub async fn update_push_subscription(
        &self,
        subscription: &PushSubscription,
    ) -> Result<(), ClientError> {
        let user_id = self.registered_user_id()?;
        self.api.update_subscription(&user_id, subscription).await?;
        Ok(())
    }

    pub async fn send_random_ping(&self, display_country_of_origin: bool) -> Result<(), ClientError> {
        let user_id = self.registered_user_id()?;
        self.api
            .send_random_ping(&user_id, display_country_of_origin)
            .await?;
        self.record_sent_ping()
    }

    pub async fn reply_to_ping(&self, reply_to: &str) -> Result<(), ClientError> {
        let user_id = self.registered_user_id()?;
        self.api.reply_to_ping(&user_id, reply_to).await?;
        self.record_sent_ping()
    }

    fn registered_user_id(&self) -> Result<String, ClientError> {
        self.store
            .load()?
            .user_info
            .map(|user_info| user_info.user_id)
            .ok_or(ClientError::NotRegistered)
    }

    fn record_sent_ping(&self) -> Result<(), ClientError> {
        let profile = self
            .store
            .update(|profile| profile.stats.sent_pings_count += 1)?;
        tracing::debug!(sent_pings = profile.stats.sent_pings_count, "Ping sent");
        Ok(())
    }
}
