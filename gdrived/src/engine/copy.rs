use std::collections::HashMap;

use futures_util::StreamExt;
use futures_util::stream;
use gdrive_core::{FileMetadata, RequestSpec};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::crawler::{CrawlError, CrawlOptions, Crawler};
use super::executor::{ExecuteError, RequestExecutor};
use super::node::RemoteNode;
use super::progress::ProgressTicker;
use super::task::{CopyTask, ResumeChoice, TaskError, TaskStatus, TaskTracker};
use crate::credentials::CredentialMode;

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("no copy target given and no default target configured")]
    MissingTarget,
    #[error("no credentials left; the copy cannot make further progress")]
    NoCredentials,
    #[error("failed to create the destination root under {target}: {source}")]
    RootCreation {
        target: String,
        source: ExecuteError,
    },
    #[error("task {0} has no destination root")]
    MissingRoot(i64),
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Crawl(#[from] CrawlError),
}

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub source: String,
    pub target: Option<String>,
    /// Name of the new destination root; defaults to the source's name.
    pub name: Option<String>,
    /// Files smaller than this are left out. Files of unknown size count as empty.
    pub min_size: Option<u64>,
    pub force_refresh: bool,
    pub all_drives: bool,
    pub mode: CredentialMode,
    pub on_existing: ResumeChoice,
}

impl CopyRequest {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: None,
            name: None,
            min_size: None,
            force_refresh: false,
            all_drives: true,
            mode: CredentialMode::Pooled,
            on_existing: ResumeChoice::Continue,
        }
    }

    fn crawl_options(&self, force_refresh: bool) -> CrawlOptions {
        CrawlOptions {
            force_refresh: self.force_refresh || force_refresh,
            all_drives: self.all_drives,
            mode: self.mode,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    pub folders_created: usize,
    pub folders_failed: usize,
    /// Folders never attempted because an ancestor could not be created.
    pub folders_unreachable: usize,
    pub files_copied: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub incomplete_folders: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CopyOutcome {
    Completed {
        task_id: i64,
        dest_root: String,
        stats: CopyStats,
    },
    Exited {
        task_id: i64,
    },
    Interrupted {
        task_id: i64,
        stats: CopyStats,
    },
}

enum Flow {
    Continue,
    Interrupted,
}

enum ItemResult {
    Created { source_id: String, dest_id: String },
    Copied,
    Failed,
    NoCredentials,
    Fatal(TaskError),
}

/// Mirrors a source tree under a target folder, resumably.
#[derive(Clone)]
pub struct CopyService {
    executor: RequestExecutor,
    crawler: Crawler,
    tracker: TaskTracker,
    default_target: Option<String>,
    cancel: CancellationToken,
}

impl CopyService {
    pub fn new(
        executor: RequestExecutor,
        crawler: Crawler,
        tracker: TaskTracker,
        default_target: Option<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            crawler,
            tracker,
            default_target,
            cancel,
        }
    }

    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub async fn recover_interrupted(&self) -> Result<u64, CopyError> {
        Ok(self.tracker.recover_interrupted().await?)
    }

    pub async fn copy(&self, request: CopyRequest) -> Result<CopyOutcome, CopyError> {
        let target = request
            .target
            .clone()
            .or_else(|| self.default_target.clone())
            .ok_or(CopyError::MissingTarget)?;

        let (task, force_refresh) = match self.tracker.find(&request.source, &target).await? {
            Some(task) if task.status == TaskStatus::Copying => {
                return Err(TaskError::AlreadyRunning {
                    source_id: task.source,
                    target_id: task.target,
                }
                .into());
            }
            Some(task) => match request.on_existing {
                ResumeChoice::Exit => {
                    info!(task_id = task.id, status = task.status.as_str(), "leaving existing task as is");
                    return Ok(CopyOutcome::Exited { task_id: task.id });
                }
                ResumeChoice::Continue if task.dest_root().is_some() => {
                    (self.tracker.resume(&task).await?, false)
                }
                ResumeChoice::Continue | ResumeChoice::Restart => {
                    let root = self.create_root(&request, &target).await?;
                    (self.tracker.restart(&task, &root).await?, true)
                }
            },
            None => {
                let root = self.create_root(&request, &target).await?;
                (
                    self.tracker.create(&request.source, &target, &root).await?,
                    false,
                )
            }
        };

        match self.run(&task, &request, force_refresh).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(task_id = task.id, error = %err, "copy task failed");
                if let Err(mark) = self.tracker.fail(task.id).await {
                    warn!(task_id = task.id, error = %mark, "could not mark task as failed");
                }
                Err(err)
            }
        }
    }

    async fn create_root(&self, request: &CopyRequest, target: &str) -> Result<String, CopyError> {
        let name = match &request.name {
            Some(name) => name.clone(),
            None => self.crawler.resolve_name(&request.source, request.mode).await,
        };
        let spec = RequestSpec::create_folder(&name, target);
        match self
            .executor
            .execute_as::<FileMetadata>(&spec, request.mode)
            .await
        {
            Ok(root) => {
                info!(%name, dest_root = %root.id, target, "destination root created");
                Ok(root.id)
            }
            Err(ExecuteError::NoCredentials) => Err(CopyError::NoCredentials),
            Err(source) => Err(CopyError::RootCreation {
                target: target.to_string(),
                source,
            }),
        }
    }

    async fn run(
        &self,
        task: &CopyTask,
        request: &CopyRequest,
        force_refresh: bool,
    ) -> Result<CopyOutcome, CopyError> {
        let mut stats = CopyStats::default();
        if self.cancel.is_cancelled() {
            return self.interrupted(task, stats).await;
        }

        let dest_root = task
            .dest_root()
            .ok_or(CopyError::MissingRoot(task.id))?
            .to_string();
        let crawl = self
            .crawler
            .walk(&task.source, request.crawl_options(force_refresh))
            .await?;
        stats.incomplete_folders = crawl.incomplete;

        let (folders, files): (Vec<_>, Vec<_>) =
            crawl.nodes.into_iter().partition(RemoteNode::is_folder);

        let mut mapping = task.mapping();
        if let Flow::Interrupted = self
            .create_folders(task.id, &folders, &mut mapping, request.mode, &mut stats)
            .await?
        {
            return self.interrupted(task, stats).await;
        }
        if self.cancel.is_cancelled() {
            return self.interrupted(task, stats).await;
        }

        self.copy_files(task, &files, &mapping, &dest_root, request, &mut stats)
            .await?;
        if self.cancel.is_cancelled() {
            return self.interrupted(task, stats).await;
        }

        self.tracker.finish(task.id).await?;
        info!(
            task_id = task.id,
            folders_created = stats.folders_created,
            files_copied = stats.files_copied,
            files_failed = stats.files_failed,
            "copy finished"
        );
        Ok(CopyOutcome::Completed {
            task_id: task.id,
            dest_root,
            stats,
        })
    }

    async fn interrupted(&self, task: &CopyTask, stats: CopyStats) -> Result<CopyOutcome, CopyError> {
        self.tracker.interrupt(task.id).await?;
        Ok(CopyOutcome::Interrupted {
            task_id: task.id,
            stats,
        })
    }

    /// Recreates `folders` level by level: a folder is only created once its
    /// parent has a destination id. Folders already in `mapping` are skipped.
    async fn create_folders(
        &self,
        task_id: i64,
        folders: &[RemoteNode],
        mapping: &mut HashMap<String, String>,
        mode: CredentialMode,
        stats: &mut CopyStats,
    ) -> Result<Flow, CopyError> {
        let mut pending: Vec<&RemoteNode> = folders
            .iter()
            .filter(|folder| !mapping.contains_key(&folder.id))
            .collect();
        if pending.is_empty() {
            return Ok(Flow::Continue);
        }
        info!(task_id, total = pending.len(), "creating folders");
        let progress = ProgressTicker::start(
            "folders",
            self.crawler.progress_every(),
            self.executor.limiter().clone(),
        );

        loop {
            if self.cancel.is_cancelled() {
                return Ok(Flow::Interrupted);
            }
            let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|folder| {
                folder
                    .parent()
                    .is_some_and(|parent| mapping.contains_key(parent))
            });
            pending = waiting;
            if ready.is_empty() {
                break;
            }

            let level: Vec<(&RemoteNode, String)> = ready
                .into_iter()
                .filter_map(|folder| {
                    let parent = mapping.get(folder.parent()?)?.clone();
                    Some((folder, parent))
                })
                .collect();
            let results: Vec<ItemResult> = stream::iter(level)
                .take_until(self.cancel.cancelled())
                .map(|(folder, parent)| self.create_folder(task_id, folder, parent, mode))
                .buffer_unordered(self.executor.limiter().capacity())
                .collect()
                .await;

            let mut no_credentials = false;
            for result in results {
                match result {
                    ItemResult::Created { source_id, dest_id } => {
                        progress.add(1);
                        stats.folders_created += 1;
                        mapping.insert(source_id, dest_id);
                    }
                    ItemResult::Copied | ItemResult::Failed => stats.folders_failed += 1,
                    ItemResult::NoCredentials => no_credentials = true,
                    ItemResult::Fatal(err) => return Err(err.into()),
                }
            }
            if no_credentials {
                return Err(CopyError::NoCredentials);
            }
        }

        if !pending.is_empty() {
            warn!(
                task_id,
                count = pending.len(),
                "folders skipped because a parent folder could not be created"
            );
            stats.folders_unreachable += pending.len();
        }
        Ok(Flow::Continue)
    }

    async fn create_folder(
        &self,
        task_id: i64,
        folder: &RemoteNode,
        parent: String,
        mode: CredentialMode,
    ) -> ItemResult {
        let spec = RequestSpec::create_folder(&folder.name, &parent);
        match self.executor.execute_as::<FileMetadata>(&spec, mode).await {
            Ok(created) => match self.tracker.record_folder(task_id, &folder.id, &created.id).await {
                Ok(()) => ItemResult::Created {
                    source_id: folder.id.clone(),
                    dest_id: created.id,
                },
                Err(err) => ItemResult::Fatal(err),
            },
            Err(ExecuteError::NoCredentials) => ItemResult::NoCredentials,
            Err(err) => {
                warn!(folder_id = %folder.id, name = %folder.name, error = %err, "failed to create folder");
                ItemResult::Failed
            }
        }
    }

    /// Copies every file that is not yet recorded as copied. A file whose
    /// parent was never mapped lands in the destination root.
    async fn copy_files(
        &self,
        task: &CopyTask,
        files: &[RemoteNode],
        mapping: &HashMap<String, String>,
        dest_root: &str,
        request: &CopyRequest,
        stats: &mut CopyStats,
    ) -> Result<(), CopyError> {
        let min_size = request.min_size.unwrap_or(0);
        let todo: Vec<&RemoteNode> = files
            .iter()
            .filter(|file| !task.copied_file_ids.contains(&file.id))
            .filter(|file| file.size.unwrap_or(0) >= min_size)
            .collect();
        stats.files_skipped += files.len() - todo.len();
        if todo.is_empty() {
            return Ok(());
        }
        info!(task_id = task.id, total = todo.len(), "copying files");
        let progress = ProgressTicker::start(
            "files",
            self.crawler.progress_every(),
            self.executor.limiter().clone(),
        );

        let results: Vec<ItemResult> = stream::iter(todo)
            .take_until(self.cancel.cancelled())
            .map(|file| {
                let parent = file
                    .parent()
                    .and_then(|parent| mapping.get(parent))
                    .map(String::as_str)
                    .unwrap_or(dest_root);
                self.copy_file(task.id, file, parent, request.mode)
            })
            .buffer_unordered(self.executor.limiter().capacity())
            .inspect(|result| {
                if matches!(result, ItemResult::Copied) {
                    progress.add(1);
                }
            })
            .collect()
            .await;

        let mut no_credentials = false;
        let mut fatal = None;
        for result in results {
            match result {
                ItemResult::Copied => stats.files_copied += 1,
                ItemResult::Created { .. } | ItemResult::Failed => stats.files_failed += 1,
                ItemResult::NoCredentials => {
                    stats.files_failed += 1;
                    no_credentials = true;
                }
                ItemResult::Fatal(err) => fatal = Some(err),
            }
        }
        if let Some(err) = fatal {
            return Err(err.into());
        }
        if no_credentials {
            return Err(CopyError::NoCredentials);
        }
        Ok(())
    }

    async fn copy_file(
        &self,
        task_id: i64,
        file: &RemoteNode,
        parent: &str,
        mode: CredentialMode,
    ) -> ItemResult {
        let spec = RequestSpec::copy_file(&file.id, parent);
        match self.executor.execute(&spec, mode).await {
            Ok(_) => match self.tracker.record_file(task_id, &file.id).await {
                Ok(()) => ItemResult::Copied,
                Err(err) => ItemResult::Fatal(err),
            },
            Err(ExecuteError::NoCredentials) => ItemResult::NoCredentials,
            Err(err) => {
                warn!(file_id = %file.id, name = %file.name, error = %err, "failed to copy file");
                ItemResult::Failed
            }
        }
    }
}
