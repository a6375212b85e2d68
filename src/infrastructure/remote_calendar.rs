use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use chrono_tz::Tz;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

const WINDOW_PAST_DAYS: i64 = 30;
const WINDOW_FUTURE_DAYS: i64 = 90;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteSyncStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
}

impl RemoteSyncStatus {
    pub fn disconnected() -> Self {
        Self {
            connected: false,
            last_sync: None,
        }
    }
}

/// The remote calendar collaborator, reduced to the two calls the core
/// depends on. `sync_now` is the only network side-effecting operation and
/// the only one gated by backoff.
#[async_trait]
pub trait RemoteCalendar: Send + Sync {
    async fn sync_status(&self) -> Result<RemoteSyncStatus, InfraError>;
    async fn sync_now(&self) -> Result<bool, InfraError>;
}

/// HTTP client for the sync bridge. Sync is a best-effort full resync of a
/// rolling window around now; the bridge owns the push/pull details.
#[derive(Debug, Clone)]
pub struct HttpRemoteCalendar {
    client: Client,
    base_url: Url,
    token: Option<String>,
    timezone: Tz,
}

#[derive(Debug, Serialize)]
struct SyncRequest {
    #[serde(rename = "timeMin")]
    time_min: String,
    #[serde(rename = "timeMax")]
    time_max: String,
    #[serde(rename = "timeZone")]
    time_zone: String,
}

#[derive(Debug, Deserialize)]
struct SyncResponse {
    ok: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    connected: Option<bool>,
    #[serde(rename = "lastSync")]
    last_sync: Option<String>,
}

impl HttpRemoteCalendar {
    pub fn new(base_url: Url, token: Option<String>, timezone: Tz) -> Self {
        Self {
            client: Client::new(),
            base_url,
            token: token
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToOwned::to_owned),
            timezone,
        }
    }

    fn endpoint(&self, segment: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Remote("sync base URL cannot be a base".to_string()))?;
            segments.pop_if_empty();
            segments.push(segment);
        }
        Ok(url)
    }

    fn remote_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("sync bridge error: http {}", status.as_u16())
        } else {
            format!("sync bridge error: http {}; body={body}", status.as_u16())
        };
        InfraError::Remote(message)
    }

    /// Rolling resync window, expressed as zone-aware instants so the
    /// bridge never has to guess what the store's naive local times mean.
    fn sync_window(&self) -> SyncRequest {
        let now = Utc::now().with_timezone(&self.timezone);
        let time_min = now - Duration::days(WINDOW_PAST_DAYS);
        let time_max = now + Duration::days(WINDOW_FUTURE_DAYS);
        SyncRequest {
            time_min: time_min.to_rfc3339(),
            time_max: time_max.to_rfc3339(),
            time_zone: self.timezone.name().to_string(),
        }
    }
}

#[async_trait]
impl RemoteCalendar for HttpRemoteCalendar {
    async fn sync_status(&self) -> Result<RemoteSyncStatus, InfraError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(RemoteSyncStatus::disconnected());
        };

        let url = self.endpoint("status")?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error while fetching sync status: {error}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Ok(RemoteSyncStatus::disconnected());
        }
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading sync status response: {error}")))?;
        if !status.is_success() {
            return Err(Self::remote_http_error(status, &body));
        }

        let parsed: StatusResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Remote(format!("invalid sync status payload: {error}; body={body}"))
        })?;
        Ok(RemoteSyncStatus {
            connected: parsed.connected.unwrap_or(false),
            last_sync: parsed.last_sync,
        })
    }

    async fn sync_now(&self) -> Result<bool, InfraError> {
        let Some(token) = self.token.as_deref() else {
            return Ok(false);
        };

        let url = self.endpoint("sync")?;
        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&self.sync_window())
            .send()
            .await
            .map_err(|error| InfraError::Remote(format!("network error during sync: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Remote(format!("failed reading sync response: {error}")))?;
        if !status.is_success() {
            return Err(Self::remote_http_error(status, &body));
        }

        let parsed: SyncResponse = serde_json::from_str(&body).unwrap_or(SyncResponse { ok: None });
        Ok(parsed.ok.unwrap_or(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_token_reports_disconnected_without_network() {
        let remote = HttpRemoteCalendar::new(
            Url::parse("http://127.0.0.1:9/api").expect("url"),
            None,
            chrono_tz::UTC,
        );
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let status = runtime.block_on(remote.sync_status()).expect("status");
        assert!(!status.connected);
        let synced = runtime.block_on(remote.sync_now()).expect("sync");
        assert!(!synced);
    }

    #[test]
    fn endpoint_joins_segments_onto_base_path() {
        let remote = HttpRemoteCalendar::new(
            Url::parse("http://bridge.local/api/").expect("url"),
            Some("token".to_string()),
            chrono_tz::UTC,
        );
        let url = remote.endpoint("sync").expect("endpoint");
        assert_eq!(url.as_str(), "http://bridge.local/api/sync");
    }

    #[test]
    fn sync_window_spans_past_and_future_days() {
        let remote = HttpRemoteCalendar::new(
            Url::parse("http://bridge.local/api").expect("url"),
            Some("token".to_string()),
            chrono_tz::Europe::Berlin,
        );
        let window = remote.sync_window();
        assert_eq!(window.time_zone, "Europe/Berlin");
        assert!(window.time_min < window.time_max);
    }
}
