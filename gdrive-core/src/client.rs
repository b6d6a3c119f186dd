use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::request::RequestSpec;

const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: Url,
}

impl DriveClient {
    pub fn new() -> Result<Self, DriveError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, DriveError> {
        Ok(Self {
            http: Client::new(),
            base_url: Url::parse(base_url)?,
        })
    }

    /// Issues one call. An empty success body (e.g. DELETE) yields `Value::Null`.
    pub async fn send(
        &self,
        spec: &RequestSpec,
        token: &str,
        timeout: Duration,
    ) -> Result<Value, DriveError> {
        let mut url = self.base_url.join(&spec.path)?;
        if !spec.query.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in &spec.query {
                query.append_pair(key, value);
            }
        }
        let mut request = self
            .http
            .request(spec.method.clone(), url)
            .bearer_auth(token)
            .timeout(timeout);
        if let Some(body) = &spec.body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DriveError::Api { status, body });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn send_as<T: DeserializeOwned>(
        &self,
        spec: &RequestSpec,
        token: &str,
        timeout: Duration,
    ) -> Result<T, DriveError> {
        let value = self.send(spec, token, timeout).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl DriveError {
    pub fn classification(&self) -> ApiErrorClass {
        match self {
            DriveError::Api { status, body } => classify_api_error(*status, body),
            DriveError::Request(_) => ApiErrorClass::Transient,
            DriveError::Url(_) | DriveError::Decode(_) => ApiErrorClass::Permanent,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.classification() == ApiErrorClass::RateLimit
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, DriveError::Request(err) if err.is_timeout())
    }

    /// The `error.message` field of a Drive error payload, when present.
    pub fn api_message(&self) -> Option<String> {
        match self {
            DriveError::Api { body, .. } => error_message(body),
            _ => None,
        }
    }
}

fn error_message(body: &str) -> Option<String> {
    let payload: Value = serde_json::from_str(body).ok()?;
    payload
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

// Drive reports quota exhaustion as 403 with a "rate limit" message, so the
// message wins over the status code.
fn classify_api_error(status: StatusCode, body: &str) -> ApiErrorClass {
    let rate_limited = error_message(body)
        .map(|message| message.to_lowercase().contains("rate limit"))
        .unwrap_or(false);
    if rate_limited || status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(default, deserialize_with = "size_from_string")]
    pub size: Option<u64>,
    #[serde(default)]
    pub md5_checksum: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct FileMetadata {
    pub id: String,
    pub name: String,
}

// Drive encodes int64 fields as decimal strings.
fn size_from_string<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(de::Error::custom),
    }
}
