//! HTTP boundary - session info and roomcast code lifecycle

use crate::client::timer::parse_server_time;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, COOKIE};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Name of the session cookie the server issues
pub const SESSION_COOKIE: &str = "session_token";

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid base URL: {0}")]
    InvalidUrl(String),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} has expired")]
    Expired(String),

    #[error("server returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("undecodable response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One presentation instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionInfo {
    #[serde(alias = "deployment")]
    pub deployment_id: String,
    pub title: String,
    pub roomcast_enabled: bool,
}

/// A display pairing code and the groups it covers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastCode {
    pub code: String,
    /// Session title shown on the display
    pub title: Option<String>,
    pub expected_groups: Vec<String>,
    pub connected_groups: Vec<String>,
    #[serde(deserialize_with = "deserialize_server_time")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl RoomcastCode {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }
}

/// Instructor view of the roomcast lifecycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomcastStatus {
    pub enabled: bool,
    pub active: bool,
    pub code: Option<String>,
    pub expected_groups: Vec<String>,
    pub connected_groups: Vec<String>,
    #[serde(deserialize_with = "deserialize_server_time")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn deserialize_server_time<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(raw) => parse_server_time(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{}`", raw))),
    }
}

/// Thin client over the session server's REST endpoints
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Build a client; a token is sent as the session cookie on every call
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = token {
            headers.insert(
                COOKIE,
                HeaderValue::from_str(&format!("{}={}", SESSION_COOKIE, token))?,
            );
        }

        let parsed = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ApiError::InvalidUrl(base_url.to_string()))?;

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            http,
            base_url: parsed,
        })
    }

    /// Append path segments to the base address, percent-encoding each one
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `GET /api/sessions/{id}`
    pub async fn session_info(&self, session_id: &str) -> Result<SessionInfo, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id])?;
        self.request(reqwest::Method::GET, url, None, &format!("session {}", session_id))
            .await
    }

    /// `GET /api/roomcast/{code}`; 404 and 410 become `NotFound` / `Expired`
    pub async fn roomcast_code(&self, code: &str) -> Result<RoomcastCode, ApiError> {
        let url = self.endpoint(&["api", "roomcast", code])?;
        self.request(reqwest::Method::GET, url, None, &format!("code {}", code))
            .await
    }

    /// Open a pairing code for the given groups
    pub async fn start_roomcast(
        &self,
        session_id: &str,
        expected_groups: &[String],
    ) -> Result<RoomcastCode, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id, "roomcast", "start"])?;
        let body = serde_json::json!({ "expected_groups": expected_groups });
        self.request(reqwest::Method::POST, url, Some(body), "roomcast")
            .await
    }

    /// Invalidate the session's pairing code
    pub async fn cancel_roomcast(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id, "roomcast", "cancel"])?;
        let _: serde_json::Value = self
            .request(reqwest::Method::POST, url, Some(serde_json::json!({})), "roomcast")
            .await?;
        Ok(())
    }

    /// Turn roomcast mode on or off for the session
    pub async fn toggle_roomcast(
        &self,
        session_id: &str,
        enabled: bool,
    ) -> Result<RoomcastStatus, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id, "roomcast", "toggle"])?;
        let body = serde_json::json!({ "enabled": enabled });
        self.request(reqwest::Method::POST, url, Some(body), "roomcast")
            .await
    }

    pub async fn roomcast_status(&self, session_id: &str) -> Result<RoomcastStatus, ApiError> {
        let url = self.endpoint(&["api", "sessions", session_id, "roomcast", "status"])?;
        self.request(reqwest::Method::GET, url, None, "roomcast")
            .await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        url: Url,
        body: Option<serde_json::Value>,
        what: &str,
    ) -> Result<T, ApiError> {
        tracing::debug!("{} {}", method, url);

        let request = self.http.request(method, url);
        let request = if let Some(json) = body {
            request.json(&json)
        } else {
            request
        };

        let response = request.send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(ApiError::NotFound(what.to_string())),
            StatusCode::GONE => return Err(ApiError::Expired(what.to_string())),
            status if !status.is_success() => {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            _ => {}
        }

        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            // 204-style empty bodies read as JSON null
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}
