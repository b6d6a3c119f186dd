use std::time::Duration;

use futures_util::future::{BoxFuture, try_join_all};
use gdrive_core::{FileList, FileMetadata, RequestSpec};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::executor::{ExecuteError, RequestExecutor};
use super::node::RemoteNode;
use super::progress::ProgressTicker;
use super::tree_cache::{TreeCache, TreeCacheEntry};
use crate::credentials::CredentialMode;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no credentials available")]
    NoCredentials,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlOptions {
    /// Ignore cached listings and list every folder again.
    pub force_refresh: bool,
    pub all_drives: bool,
    pub mode: CredentialMode,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            all_drives: true,
            mode: CredentialMode::Primary,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlOutcome {
    pub nodes: Vec<RemoteNode>,
    /// Folders whose listing ran out of retries. Their partial contents are
    /// included in `nodes` but were not cached.
    pub incomplete: Vec<String>,
}

impl CrawlOutcome {
    pub fn is_complete(&self) -> bool {
        self.incomplete.is_empty()
    }

    fn absorb(&mut self, other: CrawlOutcome) {
        self.nodes.extend(other.nodes);
        self.incomplete.extend(other.incomplete);
    }
}

#[derive(Clone)]
pub struct Crawler {
    executor: RequestExecutor,
    cache: TreeCache,
    page_size: u32,
    progress_every: Duration,
}

impl Crawler {
    pub fn new(
        executor: RequestExecutor,
        cache: TreeCache,
        page_size: u32,
        progress_every: Duration,
    ) -> Self {
        Self {
            executor,
            cache,
            page_size,
            progress_every,
        }
    }

    pub fn cache(&self) -> &TreeCache {
        &self.cache
    }

    pub fn progress_every(&self) -> Duration {
        self.progress_every
    }

    /// Lists the whole tree under `root_id`. Sibling folders are listed
    /// concurrently; the pages of one folder are fetched in sequence.
    pub async fn walk(
        &self,
        root_id: &str,
        options: CrawlOptions,
    ) -> Result<CrawlOutcome, CrawlError> {
        let progress = ProgressTicker::start(
            "crawl",
            self.progress_every,
            self.executor.limiter().clone(),
        );
        let outcome = self
            .visit(root_id.to_string(), options, &progress)
            .await?;
        info!(
            root_id,
            nodes = outcome.nodes.len(),
            incomplete = outcome.incomplete.len(),
            "crawl finished"
        );
        if !outcome.is_complete() {
            warn!(
                folders = ?outcome.incomplete,
                "some folders could not be fully listed; run again to retry them"
            );
        }
        Ok(outcome)
    }

    /// Serves the subtree from the cache when every folder of it is cached,
    /// otherwise crawls.
    pub async fn cached_or_walk(
        &self,
        root_id: &str,
        options: CrawlOptions,
    ) -> Result<CrawlOutcome, CrawlError> {
        if !options.force_refresh
            && let Some(nodes) = self.cache.resolve_subtree(root_id).await?
        {
            debug!(root_id, nodes = nodes.len(), "serving tree from cache");
            return Ok(CrawlOutcome {
                nodes,
                incomplete: Vec::new(),
            });
        }
        self.walk(root_id, options).await
    }

    fn visit<'a>(
        &'a self,
        folder_id: String,
        options: CrawlOptions,
        progress: &'a ProgressTicker,
    ) -> BoxFuture<'a, Result<CrawlOutcome, CrawlError>> {
        Box::pin(async move {
            let entry = self.listing(&folder_id, options).await?;
            progress.add(entry.children.len());

            let mut outcome = CrawlOutcome {
                incomplete: if entry.complete {
                    Vec::new()
                } else {
                    vec![folder_id]
                },
                nodes: entry.children,
            };
            let subtrees = try_join_all(
                entry
                    .subfolder_ids
                    .into_iter()
                    .map(|id| self.visit(id, options, progress)),
            )
            .await?;
            for subtree in subtrees {
                outcome.absorb(subtree);
            }
            Ok(outcome)
        })
    }

    async fn listing(
        &self,
        folder_id: &str,
        options: CrawlOptions,
    ) -> Result<TreeCacheEntry, CrawlError> {
        if !options.force_refresh
            && let Some(entry) = self.cache.get(folder_id).await?
        {
            return Ok(entry);
        }
        let entry = self.list_folder(folder_id, options).await?;
        if entry.complete {
            self.cache.put(folder_id, &entry).await?;
        } else {
            self.cache.invalidate(folder_id).await?;
        }
        Ok(entry)
    }

    /// Drains every page of one folder's listing. A page that exhausts its
    /// retries ends the listing early and marks the entry incomplete.
    pub async fn list_folder(
        &self,
        folder_id: &str,
        options: CrawlOptions,
    ) -> Result<TreeCacheEntry, CrawlError> {
        // Service identities cannot see the user's own "root" alias.
        let mode = if folder_id == "root" {
            CredentialMode::Primary
        } else {
            options.mode
        };
        let mut children = Vec::new();
        let mut page_token: Option<String> = None;
        let complete = loop {
            let spec = RequestSpec::list_children(
                folder_id,
                page_token.as_deref(),
                self.page_size,
                options.all_drives,
            );
            match self.executor.execute_as::<FileList>(&spec, mode).await {
                Ok(page) => {
                    children.extend(
                        page.files
                            .into_iter()
                            .map(|file| RemoteNode::from_drive_file(file, folder_id)),
                    );
                    match page.next_page_token {
                        Some(token) => page_token = Some(token),
                        None => break true,
                    }
                }
                Err(ExecuteError::NoCredentials) => return Err(CrawlError::NoCredentials),
                Err(err) => {
                    warn!(folder_id, listed = children.len(), error = %err, "folder listing incomplete");
                    break false;
                }
            }
        };
        Ok(TreeCacheEntry::from_listing(children, complete))
    }

    /// The name of `id`, or the id itself when the lookup fails.
    pub async fn resolve_name(&self, id: &str, mode: CredentialMode) -> String {
        let spec = RequestSpec::get_metadata(id);
        match self.executor.execute_as::<FileMetadata>(&spec, mode).await {
            Ok(meta) => meta.name,
            Err(err) => {
                warn!(id, error = %err, "could not resolve folder name");
                id.to_string()
            }
        }
    }
}
