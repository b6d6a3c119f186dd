use std::sync::Arc;

use anyhow::Context;
use gdrive_core::{DriveClient, OAuthClient};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::credentials::{
    CredentialMode, CredentialPool, RefreshTokenSource, StaticTokenSource, TokenSource,
};
use crate::engine::copy::{CopyOutcome, CopyRequest, CopyService};
use crate::engine::crawler::{CrawlOptions, Crawler};
use crate::engine::dedupe::{DedupeReport, Deduper, Duplicates, RemovalMode};
use crate::engine::executor::RequestExecutor;
use crate::engine::limiter::ConcurrencyLimiter;
use crate::engine::summary::TreeSummary;
use crate::engine::task::TaskTracker;
use crate::engine::timeout::TimeoutPolicy;
use crate::engine::tree_cache::TreeCache;
use crate::store::Store;

#[derive(Debug, Serialize)]
pub struct CountReport {
    pub folder_id: String,
    pub name: String,
    pub summary: TreeSummary,
    pub incomplete: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DedupeOutcome {
    pub duplicates: Duplicates,
    /// Present only when removal was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<DedupeReport>,
}

/// Everything one process run needs, wired together.
pub struct Engine {
    config: EngineConfig,
    crawler: Crawler,
    copier: CopyService,
    deduper: Deduper,
}

impl Engine {
    /// Opens the store, builds the credential pool and marks tasks left
    /// `copying` by a previous run as interrupted before anything else runs.
    pub async fn bootstrap(config: EngineConfig, cancel: CancellationToken) -> anyhow::Result<Self> {
        let store = match &config.db_path {
            Some(path) => Store::open(path).await,
            None => Store::open_default().await,
        }
        .context("failed to open database")?;

        let credentials = Arc::new(build_credentials(&config)?);
        let client = match &config.api_base_url {
            Some(url) => DriveClient::with_base_url(url),
            None => DriveClient::new(),
        }
        .context("invalid drive api base url")?;
        let executor = RequestExecutor::new(
            client,
            credentials,
            ConcurrencyLimiter::new(config.parallel_limit),
            TimeoutPolicy::new(config.timeout_base, config.timeout_max),
            config.retry_limit,
        );

        let crawler = Crawler::new(
            executor.clone(),
            TreeCache::new(store.clone()),
            config.page_size,
            config.progress_interval,
        );
        let copier = CopyService::new(
            executor.clone(),
            crawler.clone(),
            TaskTracker::new(store),
            config.default_target.clone(),
            cancel,
        );
        copier
            .recover_interrupted()
            .await
            .context("failed to recover interrupted tasks")?;

        let mode = credential_mode(&config);
        info!(
            parallel_limit = config.parallel_limit,
            retry_limit = config.retry_limit,
            ?mode,
            "engine ready"
        );
        Ok(Self {
            deduper: Deduper::new(executor, mode),
            config,
            crawler,
            copier,
        })
    }

    pub fn tracker(&self) -> &TaskTracker {
        self.copier.tracker()
    }

    pub fn credential_mode(&self) -> CredentialMode {
        credential_mode(&self.config)
    }

    fn crawl_options(&self, update: bool) -> CrawlOptions {
        CrawlOptions {
            force_refresh: update,
            all_drives: self.config.all_drives,
            mode: self.credential_mode(),
        }
    }

    pub async fn count(&self, folder_id: &str, update: bool) -> anyhow::Result<CountReport> {
        let crawl = self
            .crawler
            .cached_or_walk(folder_id, self.crawl_options(update))
            .await?;
        let name = self
            .crawler
            .resolve_name(folder_id, self.credential_mode())
            .await;
        Ok(CountReport {
            folder_id: folder_id.to_string(),
            name,
            summary: TreeSummary::from_nodes(&crawl.nodes),
            incomplete: crawl.incomplete,
        })
    }

    /// `request.mode` and `request.all_drives` are overridden by configuration.
    pub async fn copy(&self, mut request: CopyRequest) -> anyhow::Result<CopyOutcome> {
        request.mode = self.credential_mode();
        request.all_drives = self.config.all_drives;
        Ok(self.copier.copy(request).await?)
    }

    pub async fn dedupe(
        &self,
        folder_id: &str,
        update: bool,
        removal: Option<RemovalMode>,
    ) -> anyhow::Result<DedupeOutcome> {
        let crawl = self
            .crawler
            .cached_or_walk(folder_id, self.crawl_options(update))
            .await?;
        let duplicates = Deduper::find_duplicates(&crawl.nodes);
        info!(folder_id, count = duplicates.len(), "duplicates found");

        let removed = match removal {
            Some(removal) if !duplicates.is_empty() => {
                let report = self.deduper.remove(&duplicates, removal).await;
                // The cached listings still contain the removed nodes.
                if let Err(err) = self.crawler.walk(folder_id, self.crawl_options(true)).await {
                    warn!(folder_id, error = %err, "failed to refresh cache after removal");
                }
                Some(report)
            }
            _ => None,
        };
        Ok(DedupeOutcome {
            duplicates,
            removed,
        })
    }
}

fn credential_mode(config: &EngineConfig) -> CredentialMode {
    if config.use_service_accounts {
        CredentialMode::Pooled
    } else {
        CredentialMode::Primary
    }
}

fn build_credentials(config: &EngineConfig) -> anyhow::Result<CredentialPool> {
    let primary: Option<Arc<dyn TokenSource>> = match (&config.token, &config.primary) {
        (Some(token), _) => Some(
            Arc::new(StaticTokenSource::new("GDRIVE_TOKEN", token.clone())) as Arc<dyn TokenSource>,
        ),
        (None, Some(primary)) => {
            let client = match &config.oauth_base_url {
                Some(url) => OAuthClient::with_base_url(
                    url,
                    primary.client_id.clone(),
                    primary.client_secret.clone(),
                ),
                None => OAuthClient::new(primary.client_id.clone(), primary.client_secret.clone()),
            }
            .context("invalid oauth configuration")?;
            Some(Arc::new(RefreshTokenSource::new(
                "primary",
                client,
                primary.refresh_token.clone(),
            )) as Arc<dyn TokenSource>)
        }
        (None, None) => None,
    };

    let identities = match &config.identity_dir {
        Some(dir) if config.use_service_accounts => {
            CredentialPool::load_identities(dir, config.oauth_base_url.as_deref())
                .with_context(|| format!("failed to load service identities from {}", dir.display()))?
        }
        _ => Vec::new(),
    };
    if config.use_service_accounts && identities.is_empty() {
        anyhow::bail!("service accounts are enabled but no identity files were found");
    }
    if primary.is_none() && identities.is_empty() {
        anyhow::bail!(
            "no credentials configured: set GDRIVE_TOKEN, the GDRIVE_CLIENT_ID/GDRIVE_CLIENT_SECRET/GDRIVE_REFRESH_TOKEN triple, or GDRIVE_SA_DIR"
        );
    }
    Ok(CredentialPool::new(primary, identities))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::task::TaskStatus;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server: &MockServer, dir: &tempfile::TempDir) -> EngineConfig {
        EngineConfig {
            db_path: Some(dir.path().join("gdrived.db")),
            token: Some("tok".to_string()),
            api_base_url: Some(server.uri()),
            progress_interval: Duration::ZERO,
            retry_limit: 2,
            timeout_base: Duration::from_millis(500),
            ..EngineConfig::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_interrupts_tasks_left_copying() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = config(&server, &dir);

        let store = Store::open(config.db_path.as_deref().unwrap()).await.unwrap();
        TaskTracker::new(store)
            .create("src", "dst", "root")
            .await
            .unwrap();

        let engine = Engine::bootstrap(config, CancellationToken::new())
            .await
            .unwrap();
        let task = engine.tracker().find("src", "dst").await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Interrupt);
    }

    #[tokio::test]
    async fn bootstrap_requires_some_credential() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            token: None,
            ..config(&server, &dir)
        };
        assert!(Engine::bootstrap(config, CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn count_summarizes_the_tree() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files"))
            .and(query_param("q", "'R' in parents and trashed = false"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "files": [
                    { "id": "a", "name": "a.txt", "mimeType": "text/plain", "size": "3", "md5Checksum": "h" },
                    { "id": "b", "name": "b.txt", "mimeType": "text/plain", "size": "4", "md5Checksum": "h" }
                ]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/drive/v3/files/R"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "R", "name": "Root" })))
            .mount(&server)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::bootstrap(config(&server, &dir), CancellationToken::new())
            .await
            .unwrap();

        let report = engine.count("R", false).await.unwrap();
        assert_eq!(report.name, "Root");
        assert_eq!(report.summary.files, 2);
        assert_eq!(report.summary.total_bytes, 7);

        let dedupe = engine.dedupe("R", false, None).await.unwrap();
        assert_eq!(dedupe.duplicates.files.len(), 1);
        assert!(dedupe.removed.is_none());
    }
}
