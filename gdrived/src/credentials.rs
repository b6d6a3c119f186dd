use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gdrive_core::{OAuthClient, OAuthError};
use rand::seq::SliceRandom;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_TTL_SECS: u64 = 3600;
const REFRESH_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials available")]
    NoCredentialsAvailable,
    #[error("token exchange failed for {label}: {source}")]
    Exchange { label: String, source: OAuthError },
    #[error("failed to read identity file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid identity file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
}

/// A short-lived bearer token and how long it stays valid.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub ttl: Duration,
}

/// Something that can be exchanged for an access token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    fn label(&self) -> &str;
    async fn exchange(&self) -> Result<AccessToken, CredentialError>;
}

/// OAuth refresh-token identity.
pub struct RefreshTokenSource {
    label: String,
    client: OAuthClient,
    refresh_token: String,
}

#[derive(Deserialize)]
struct IdentityFile {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

impl RefreshTokenSource {
    pub fn new(label: impl Into<String>, client: OAuthClient, refresh_token: String) -> Self {
        Self {
            label: label.into(),
            client,
            refresh_token,
        }
    }

    /// Loads `{client_id, client_secret, refresh_token}` from a JSON file.
    /// Service-account key files (private key plus JWT grant) are rejected
    /// with [`CredentialError::Parse`].
    pub fn from_file(path: &Path, oauth_base_url: Option<&str>) -> Result<Self, CredentialError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| CredentialError::Io {
            path: display.clone(),
            source,
        })?;
        let file: IdentityFile =
            serde_json::from_str(&raw).map_err(|source| CredentialError::Parse {
                path: display.clone(),
                source,
            })?;
        let client = match oauth_base_url {
            Some(base) => OAuthClient::with_base_url(base, file.client_id, file.client_secret),
            None => OAuthClient::new(file.client_id, file.client_secret),
        }
        .map_err(|source| CredentialError::Exchange {
            label: display.clone(),
            source,
        })?;
        let label = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(display);
        Ok(Self::new(label, client, file.refresh_token))
    }
}

#[async_trait]
impl TokenSource for RefreshTokenSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exchange(&self) -> Result<AccessToken, CredentialError> {
        let token = self
            .client
            .refresh_token(&self.refresh_token)
            .await
            .map_err(|source| CredentialError::Exchange {
                label: self.label.clone(),
                source,
            })?;
        Ok(AccessToken {
            token: token.access_token,
            ttl: Duration::from_secs(token.expires_in.unwrap_or(DEFAULT_TTL_SECS)),
        })
    }
}

/// A fixed token, e.g. one supplied through the environment.
pub struct StaticTokenSource {
    label: String,
    token: String,
}

impl StaticTokenSource {
    pub fn new(label: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exchange(&self) -> Result<AccessToken, CredentialError> {
        Ok(AccessToken {
            token: self.token.clone(),
            ttl: Duration::from_secs(365 * 24 * 3600),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialMode {
    /// Spread load over pooled identities; uses the primary credential only
    /// when no identities were ever configured.
    Pooled,
    Primary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(usize);

/// A token handed out for one attempt, remembering which handle issued it so
/// that the handle can be evicted if the call hits a quota.
#[derive(Debug, Clone)]
pub struct LeasedToken {
    pub token: String,
    pub handle: HandleId,
    pub pooled: bool,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

pub struct CredentialHandle {
    id: HandleId,
    source: Arc<dyn TokenSource>,
    cached: Mutex<Option<CachedToken>>,
}

impl CredentialHandle {
    fn new(id: usize, source: Arc<dyn TokenSource>) -> Self {
        Self {
            id: HandleId(id),
            source,
            cached: Mutex::new(None),
        }
    }

    pub fn label(&self) -> &str {
        self.source.label()
    }

    /// Returns the cached token, exchanging a new one once it is about to expire.
    /// Concurrent callers of the same handle share a single exchange.
    async fn token(&self) -> Result<String, CredentialError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref()
            && Instant::now() + REFRESH_SKEW < current.expires_at
        {
            return Ok(current.token.clone());
        }
        debug!(identity = self.label(), "exchanging access token");
        let fresh = self.source.exchange().await?;
        let token = fresh.token.clone();
        *cached = Some(CachedToken {
            token: fresh.token,
            expires_at: Instant::now() + fresh.ttl,
        });
        Ok(token)
    }
}

/// Primary credential plus a shrinking pool of service identities.
pub struct CredentialPool {
    primary: Option<CredentialHandle>,
    pooled: RwLock<Vec<Arc<CredentialHandle>>>,
    pool_configured: bool,
}

impl CredentialPool {
    pub fn new(
        primary: Option<Arc<dyn TokenSource>>,
        identities: Vec<Arc<dyn TokenSource>>,
    ) -> Self {
        let pool_configured = !identities.is_empty();
        let pooled: Vec<_> = identities
            .into_iter()
            .enumerate()
            .map(|(idx, source)| Arc::new(CredentialHandle::new(idx + 1, source)))
            .collect();
        info!(
            identities = pooled.len(),
            primary = primary.is_some(),
            "credential pool initialized"
        );
        Self {
            primary: primary.map(|source| CredentialHandle::new(0, source)),
            pooled: RwLock::new(pooled),
            pool_configured,
        }
    }

    /// Loads every `*.json` identity file in `dir`, sorted by file name.
    pub fn load_identities(
        dir: &Path,
        oauth_base_url: Option<&str>,
    ) -> Result<Vec<Arc<dyn TokenSource>>, CredentialError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CredentialError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut paths: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        paths
            .iter()
            .map(|path| {
                RefreshTokenSource::from_file(path, oauth_base_url)
                    .map(|source| Arc::new(source) as Arc<dyn TokenSource>)
            })
            .collect()
    }

    pub async fn acquire(&self, mode: CredentialMode) -> Result<LeasedToken, CredentialError> {
        match mode {
            CredentialMode::Pooled if self.pool_configured => self.acquire_pooled().await,
            _ => self.acquire_primary().await,
        }
    }

    async fn acquire_primary(&self) -> Result<LeasedToken, CredentialError> {
        let handle = self
            .primary
            .as_ref()
            .ok_or(CredentialError::NoCredentialsAvailable)?;
        Ok(LeasedToken {
            token: handle.token().await?,
            handle: handle.id,
            pooled: false,
        })
    }

    // An identity whose exchange fails is evicted on the spot and another one
    // is drawn; retrying the exchange itself is the executor's job.
    async fn acquire_pooled(&self) -> Result<LeasedToken, CredentialError> {
        loop {
            let handle = {
                let pooled = self.pooled.read().await;
                pooled
                    .choose(&mut rand::thread_rng())
                    .cloned()
                    .ok_or(CredentialError::NoCredentialsAvailable)?
            };
            match handle.token().await {
                Ok(token) => {
                    return Ok(LeasedToken {
                        token,
                        handle: handle.id,
                        pooled: true,
                    });
                }
                Err(err) => {
                    warn!(identity = handle.label(), error = %err, "token exchange failed, evicting identity");
                    self.evict(handle.id).await;
                }
            }
        }
    }

    /// Permanently removes a pooled identity. Idempotent.
    pub async fn evict(&self, handle: HandleId) {
        let mut pooled = self.pooled.write().await;
        let before = pooled.len();
        pooled.retain(|candidate| candidate.id != handle);
        if pooled.len() < before {
            warn!(remaining = pooled.len(), "identity evicted from credential pool");
        }
    }

    pub async fn remaining(&self) -> usize {
        self.pooled.read().await.len()
    }
}
