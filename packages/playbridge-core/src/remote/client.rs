//! REST control-plane client for the remote playback backend.
//!
//! [`HttpDeviceClient`] implements the remote traits over the backend's
//! player endpoints. It is bound to one device name: the device this
//! application registers, which is how `get_current_state` decides whether
//! the playback it sees is ours.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;

use crate::credentials::CredentialProvider;
use crate::remote::traits::{RemoteDiscovery, RemotePlayback};
use crate::remote::{RemoteError, RemoteResult};
use crate::types::{Device, DeviceKind, PlaybackSource, PlaybackState};

/// Account tier allowed to drive remote playback.
const PREMIUM_PRODUCT: &str = "premium";

// ─────────────────────────────────────────────────────────────────────────────
// Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct AccountResponse {
    #[serde(default)]
    product: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    devices: Vec<ApiDevice>,
}

#[derive(Debug, Deserialize)]
struct ApiDevice {
    /// Restricted devices are listed without an id.
    #[serde(default)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    is_active: bool,
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    #[serde(default)]
    device: Option<ApiDevice>,
    #[serde(default)]
    is_playing: bool,
    #[serde(default)]
    progress_ms: Option<u64>,
    #[serde(default)]
    item: Option<ApiItem>,
}

#[derive(Debug, Deserialize)]
struct ApiItem {
    id: String,
    #[serde(default)]
    duration_ms: u64,
}

// ─────────────────────────────────────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP implementation of [`RemoteDiscovery`] and [`RemotePlayback`].
pub struct HttpDeviceClient {
    http: Client,
    base_url: String,
    device_name: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpDeviceClient {
    /// Creates a client for the backend at `base_url`.
    ///
    /// # Arguments
    /// * `http` - Shared HTTP client (timeouts are configured on it)
    /// * `base_url` - Control-plane base URL, e.g. `https://api.example/v1`
    /// * `device_name` - Name this application's device registers under
    /// * `credentials` - Source of bearer tokens
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        device_name: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            device_name: device_name.into(),
            credentials,
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> RemoteResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| RemoteError::Parse(format!("invalid URL for {}: {}", path, e)))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    async fn bearer_token(&self) -> RemoteResult<String> {
        match self.credentials.get_token().await {
            Ok(credential) => Ok(credential.value),
            Err(e) => {
                self.credentials.on_expired();
                Err(RemoteError::Unauthorized(e.to_string()))
            }
        }
    }

    /// Sends a request with the bearer token, mapping failure statuses.
    async fn send(&self, request: RequestBuilder, action: &str) -> RemoteResult<Response> {
        let token = self.bearer_token().await?;
        log::debug!("[Remote] {}", action);

        let response = request.bearer_auth(token).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok());
        let body = response.text().await.unwrap_or_default();
        let err = RemoteError::from_status(status, retry_after, body);

        if matches!(err, RemoteError::Unauthorized(_)) {
            self.credentials.on_expired();
        }
        log::warn!("[Remote] {} failed: {}", action, err);
        Err(err)
    }

    fn to_device(&self, api: ApiDevice) -> Option<Device> {
        let id = api.id?;
        let kind = if api.name == self.device_name {
            DeviceKind::Local
        } else {
            DeviceKind::Remote
        };
        Some(Device {
            id,
            name: api.name,
            kind,
            active: api.is_active,
        })
    }

    async fn device_command(
        &self,
        method: reqwest::Method,
        path: &str,
        device_id: &str,
        extra: &[(&str, &str)],
        action: &str,
    ) -> RemoteResult<()> {
        let mut params = vec![("device_id", device_id)];
        params.extend_from_slice(extra);
        let url = self.url(path, &params)?;
        self.send(self.http.request(method, url), action).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteDiscovery for HttpDeviceClient {
    async fn connect(&self) -> RemoteResult<bool> {
        let url = self.url("/me", &[])?;
        let account: AccountResponse = self
            .send(self.http.get(url), "GetAccount")
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        match account.product.as_deref() {
            Some(product) if product != PREMIUM_PRODUCT => {
                log::warn!("[Remote] Account tier '{}' cannot drive remote playback", product);
                Err(RemoteError::Unauthorized(
                    "premium account required for remote playback".to_string(),
                ))
            }
            _ => {
                log::info!("[Remote] Connected as device '{}'", self.device_name);
                Ok(true)
            }
        }
    }

    async fn list_devices(&self) -> RemoteResult<Vec<Device>> {
        let url = self.url("/me/player/devices", &[])?;
        let response: DevicesResponse = self
            .send(self.http.get(url), "ListDevices")
            .await?
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        Ok(response
            .devices
            .into_iter()
            .filter_map(|d| self.to_device(d))
            .collect())
    }

    async fn get_current_state(&self) -> RemoteResult<Option<PlaybackState>> {
        let url = self.url("/me/player", &[])?;
        let response = self.send(self.http.get(url), "GetPlaybackState").await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        let player: PlayerResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Parse(e.to_string()))?;

        let ours = player
            .device
            .as_ref()
            .is_some_and(|d| d.name == self.device_name);
        if !ours {
            return Ok(None);
        }

        Ok(player.item.map(|item| PlaybackState {
            track_id: item.id,
            position_ms: player.progress_ms.unwrap_or(0),
            duration_ms: item.duration_ms,
            is_playing: player.is_playing,
            source: PlaybackSource::Remote,
        }))
    }
}

#[async_trait]
impl RemotePlayback for HttpDeviceClient {
    async fn transfer_playback(&self, device_id: &str) -> RemoteResult<()> {
        log::info!("[Remote] TransferPlayback: device={}", device_id);
        let url = self.url("/me/player", &[])?;
        let body = json!({ "device_ids": [device_id], "play": false });
        self.send(self.http.put(url).json(&body), "TransferPlayback")
            .await?;
        Ok(())
    }

    async fn play_uris(
        &self,
        device_id: &str,
        uris: &[String],
        offset: usize,
    ) -> RemoteResult<()> {
        log::info!(
            "[Remote] Play: device={}, uris={}, offset={}",
            device_id,
            uris.len(),
            offset
        );
        let url = self.url("/me/player/play", &[("device_id", device_id)])?;
        let body = json!({ "uris": uris, "offset": { "position": offset } });
        self.send(self.http.put(url).json(&body), "Play").await?;
        Ok(())
    }

    async fn pause(&self, device_id: &str) -> RemoteResult<()> {
        self.device_command(reqwest::Method::PUT, "/me/player/pause", device_id, &[], "Pause")
            .await
    }

    async fn resume(&self, device_id: &str) -> RemoteResult<()> {
        self.device_command(reqwest::Method::PUT, "/me/player/play", device_id, &[], "Resume")
            .await
    }

    async fn seek(&self, device_id: &str, position_ms: u64) -> RemoteResult<()> {
        let position = position_ms.to_string();
        self.device_command(
            reqwest::Method::PUT,
            "/me/player/seek",
            device_id,
            &[("position_ms", position.as_str())],
            "Seek",
        )
        .await
    }

    async fn next(&self, device_id: &str) -> RemoteResult<()> {
        self.device_command(reqwest::Method::POST, "/me/player/next", device_id, &[], "Next")
            .await
    }

    async fn previous(&self, device_id: &str) -> RemoteResult<()> {
        self.device_command(
            reqwest::Method::POST,
            "/me/player/previous",
            device_id,
            &[],
            "Previous",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentialProvider;
    use crate::types::Credential;
    use crate::utils::now_millis;

    use std::collections::HashMap;

    use axum::extract::Query;
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::{get, put};
    use axum::{Json, Router};
    use parking_lot::Mutex;

    const DEVICE_NAME: &str = "Test Player";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: &str, credential: Credential) -> (HttpDeviceClient, Arc<StaticCredentialProvider>) {
        let provider = Arc::new(StaticCredentialProvider::new(credential));
        let client = HttpDeviceClient::new(Client::new(), base_url, DEVICE_NAME, provider.clone());
        (client, provider)
    }

    fn valid_credential() -> Credential {
        Credential::new("token-123", now_millis() + 60_000)
    }

    #[tokio::test]
    async fn list_devices_marks_own_device_as_local() {
        let router = Router::new().route(
            "/me/player/devices",
            get(|headers: HeaderMap| async move {
                assert_eq!(
                    headers.get("authorization").unwrap().to_str().unwrap(),
                    "Bearer token-123"
                );
                Json(serde_json::json!({
                    "devices": [
                        { "id": "d1", "name": "Test Player", "is_active": false },
                        { "id": "d2", "name": "Kitchen", "is_active": true },
                        { "name": "Restricted" }
                    ]
                }))
            }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        let devices = client.list_devices().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].kind, DeviceKind::Local);
        assert_eq!(devices[1].kind, DeviceKind::Remote);
        assert!(devices[1].active);
    }

    #[tokio::test]
    async fn current_state_is_none_when_another_device_plays() {
        let router = Router::new().route(
            "/me/player",
            get(|| async {
                Json(serde_json::json!({
                    "device": { "id": "d2", "name": "Kitchen", "is_active": true },
                    "is_playing": true,
                    "progress_ms": 1000,
                    "item": { "id": "t1", "duration_ms": 200000 }
                }))
            }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        assert_eq!(client.get_current_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn current_state_reports_own_playback() {
        let router = Router::new().route(
            "/me/player",
            get(|| async {
                Json(serde_json::json!({
                    "device": { "id": "d1", "name": "Test Player", "is_active": true },
                    "is_playing": true,
                    "progress_ms": 4500,
                    "item": { "id": "t9", "duration_ms": 200000 }
                }))
            }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        let state = client.get_current_state().await.unwrap().unwrap();
        assert_eq!(state.track_id, "t9");
        assert_eq!(state.position_ms, 4500);
        assert!(state.is_playing);
        assert_eq!(state.source, PlaybackSource::Remote);
    }

    #[tokio::test]
    async fn no_content_means_no_state() {
        let router = Router::new().route("/me/player", get(|| async { AxumStatus::NO_CONTENT }));
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        assert_eq!(client.get_current_state().await.unwrap(), None);
    }

    #[tokio::test]
    async fn play_sends_uris_and_offset_for_device() {
        let seen: Arc<Mutex<Option<(String, serde_json::Value)>>> = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let router = Router::new().route(
            "/me/player/play",
            put(
                move |Query(params): Query<HashMap<String, String>>,
                      Json(body): Json<serde_json::Value>| {
                    let seen = seen_clone.clone();
                    async move {
                        *seen.lock() = Some((params["device_id"].clone(), body));
                        AxumStatus::NO_CONTENT
                    }
                },
            ),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        client
            .play_uris("d1", &["service:track:a".into(), "service:track:b".into()], 1)
            .await
            .unwrap();

        let (device, body) = seen.lock().clone().unwrap();
        assert_eq!(device, "d1");
        assert_eq!(body["uris"][1], "service:track:b");
        assert_eq!(body["offset"]["position"], 1);
    }

    #[tokio::test]
    async fn missing_device_maps_to_device_not_found() {
        let router = Router::new().route(
            "/me/player/play",
            put(|| async { (AxumStatus::NOT_FOUND, "Device not found") }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        let err = client.play_uris("gone", &["u".into()], 0).await.unwrap_err();
        assert!(matches!(err, RemoteError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn rejected_token_requests_refresh() {
        let router = Router::new().route(
            "/me/player/devices",
            get(|| async { (AxumStatus::UNAUTHORIZED, "token expired") }),
        );
        let base = serve(router).await;
        let (client, provider) = client(&base, valid_credential());

        let err = client.list_devices().await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(_)));
        assert!(provider.refresh_requested());
    }

    #[tokio::test]
    async fn expired_credential_fails_before_sending() {
        // Port 9 (discard) is never contacted because the credential check fails first.
        let (client, provider) = client("http://127.0.0.1:9", Credential::new("old", 1));

        let err = client.list_devices().await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(_)));
        assert!(provider.refresh_requested());
    }

    #[tokio::test]
    async fn connect_rejects_free_tier_accounts() {
        let router = Router::new().route(
            "/me",
            get(|| async { Json(serde_json::json!({ "product": "free" })) }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        assert!(matches!(
            client.connect().await,
            Err(RemoteError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_after() {
        let router = Router::new().route(
            "/me/player/devices",
            get(|| async {
                (
                    AxumStatus::TOO_MANY_REQUESTS,
                    [("retry-after", "17")],
                    "slow down",
                )
            }),
        );
        let base = serve(router).await;
        let (client, _) = client(&base, valid_credential());

        assert!(matches!(
            client.list_devices().await,
            Err(RemoteError::RateLimited(Some(17)))
        ));
    }
}
