use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::profile::{Country, ServerInfo, UserInfo};
use crate::push::PushSubscription;

/// Accepts keys with or without padding; `+` and `/` are mapped onto the
/// URL-safe alphabet before decoding.
const PUBLIC_KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("Server rejected request: {0}")]
    Rejected(String),
    #[error("Invalid server public key: {0}")]
    InvalidPublicKey(#[from] base64::DecodeError),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InfoResponse {
    pub public_key: String,
    pub ping_cooldown: u64,
}

impl InfoResponse {
    pub fn into_server_info(self) -> Result<ServerInfo, ApiError> {
        Ok(ServerInfo {
            public_key: decode_public_key(&self.public_key)?,
            ping_cooldown_seconds: self.ping_cooldown,
        })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub country: CountryResponse,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CountryResponse {
    pub iso: String,
    pub emoji: String,
}

impl From<RegisterResponse> for UserInfo {
    fn from(response: RegisterResponse) -> Self {
        UserInfo {
            user_id: response.user_id,
            country: Country {
                iso_code: response.country.iso,
                emoji: response.country.emoji,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct AckResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct UpdateSubscriptionRequest<'a> {
    user_id: &'a str,
    subscription: &'a PushSubscription,
}

#[derive(Debug, Serialize)]
struct RandomPingRequest<'a> {
    user_id: &'a str,
    display_country_of_origin: bool,
}

#[derive(Debug, Serialize)]
struct ReplyRequest<'a> {
    user_id: &'a str,
    reply_to: &'a str,
}

pub fn decode_public_key(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let normalized: String = encoded
        .trim()
        .chars()
        .map(|ch| match ch {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    PUBLIC_KEY_ENGINE.decode(normalized)
}

/// Thin client over the backend REST API. Every call is a single attempt;
/// failures go straight back to the caller.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(config::REQUEST_TIMEOUT)
            .user_agent(config::default_user_agent())
            .build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `GET /info`
    pub async fn fetch_info(&self) -> Result<InfoResponse, ApiError> {
        let response = self.client.get(self.url("/info")).send().await?;
        read_json(response).await
    }

    /// `POST /user/register`
    pub async fn register_user(&self) -> Result<RegisterResponse, ApiError> {
        let response = self.client.post(self.url("/user/register")).send().await?;
        read_json(response).await
    }

    /// `POST /user/update_notification_subscription_object`
    pub async fn update_subscription(
        &self,
        user_id: &str,
        subscription: &PushSubscription,
    ) -> Result<(), ApiError> {
        self.post_acknowledged(
            "/user/update_notification_subscription_object",
            &UpdateSubscriptionRequest {
                user_id,
                subscription,
            },
        )
        .await
    }

    /// `POST /ping/random`
    pub async fn send_random_ping(
        &self,
        user_id: &str,
        display_country_of_origin: bool,
    ) -> Result<(), ApiError> {
        self.post_acknowledged(
            "/ping/random",
            &RandomPingRequest {
                user_id,
                display_country_of_origin,
            },
        )
        .await
    }

    /// `POST /ping/reply`
    pub async fn reply_to_ping(&self, user_id: &str, reply_to: &str) -> Result<(), ApiError> {
        self.post_acknowledged("/ping/reply", &ReplyRequest { user_id, reply_to })
            .await
    }

    async fn post_acknowledged<B: Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let ack: AckResponse = read_json(response).await?;
        if !ack.ok {
            let message = ack.error.unwrap_or_default();
            tracing::warn!(path = %path, error = %message, "Server rejected request");
            return Err(ApiError::Rejected(message));
        }
        Ok(())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status != StatusCode::OK {
        tracing::warn!(url = %response.url(), status = %status, "Unexpected status code");
        return Err(ApiError::UnexpectedStatus(status));
    }
    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn decodes_url_safe_key_without_padding() {
        assert_eq!(decode_public_key("BP-_").unwrap(), vec![0x04, 0xff, 0xbf]);
        assert_eq!(decode_public_key("AQI").unwrap(), vec![1, 2]);
    }

    #[test]
    fn decodes_standard_alphabet_with_padding() {
        assert_eq!(decode_public_key("BP+/").unwrap(), vec![0x04, 0xff, 0xbf]);
        assert_eq!(decode_public_key("AQI=").unwrap(), vec![1, 2]);
    }

    #[test]
    fn rejects_garbage_key() {
        assert!(decode_public_key("not base64!").is_err());
    }

    #[tokio::test]
    async fn fetches_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/info"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"public_key": "AQID", "ping_cooldown": 3})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let info = api.fetch_info().await.unwrap().into_server_info().unwrap();

        assert_eq!(info.public_key, vec![1, 2, 3]);
        assert_eq!(info.ping_cooldown_seconds, 3);
    }

    #[tokio::test]
    async fn register_fails_on_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/register"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api.register_user().await.unwrap_err();

        assert!(matches!(err, ApiError::UnexpectedStatus(status) if status == StatusCode::INTERNAL_SERVER_ERROR));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn sends_random_ping_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ping/random"))
            .and(body_json(json!({"user_id": "u1", "display_country_of_origin": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        api.send_random_ping("u1", false).await.unwrap();
    }

    #[tokio::test]
    async fn reply_carries_server_error_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ping/reply"))
            .and(body_json(json!({"user_id": "u1", "reply_to": "p9"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"ok": false, "error": "You must wait before sending another ping. (2s)"}),
            ))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api.reply_to_ping("u1", "p9").await.unwrap_err();

        match err {
            ApiError::Rejected(message) => {
                assert_eq!(message, "You must wait before sending another ping. (2s)")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_subscription_forwards_object_verbatim() {
        let server = MockServer::start().await;
        let subscription = json!({
            "endpoint": "https://push.example/abc",
            "keys": {"p256dh": "key", "auth": "secret"}
        });
        Mock::given(method("POST"))
            .and(path("/user/update_notification_subscription_object"))
            .and(body_json(json!({"user_id": "u1", "subscription": subscription.clone()})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let api = ApiClient::new(format!("{}/", server.uri())).unwrap();
        api.update_subscription("u1", &PushSubscription(subscription))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn random_ping_fails_on_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ping/random"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"ok": true})))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api.send_random_ping("u1", true).await.unwrap_err();

        match err {
            ApiError::UnexpectedStatus(status) => assert_eq!(status, StatusCode::TOO_MANY_REQUESTS),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_subscription_fails_on_non_200() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/update_notification_subscription_object"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api
            .update_subscription("u1", &PushSubscription(json!({"endpoint": "x"})))
            .await
            .unwrap_err();

        match err {
            ApiError::UnexpectedStatus(status) => {
                assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE)
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn update_subscription_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/user/update_notification_subscription_object"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": false, "error": "Unknown user"})),
            )
            .mount(&server)
            .await;

        let api = ApiClient::new(server.uri()).unwrap();
        let err = api
            .update_subscription("u1", &PushSubscription(json!({"endpoint": "x"})))
            .await
            .unwrap_err();

        match err {
            ApiError::Rejected(message) => assert_eq!(message, "Unknown user"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
