use std::collections::{HashMap, HashSet};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{Store, StoreError};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("a copy from {source_id} to {target_id} is already running")]
    AlreadyRunning { source_id: String, target_id: String },
}

/// Lifecycle of a copy task:
/// `copying -> {interrupt, error, finished}`; an interrupted or failed task
/// only leaves its state by being claimed back into `copying`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Copying,
    Interrupt,
    Error,
    Finished,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Copying => "copying",
            TaskStatus::Interrupt => "interrupt",
            TaskStatus::Error => "error",
            TaskStatus::Finished => "finished",
        }
    }

    pub fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "copying" => Ok(TaskStatus::Copying),
            "interrupt" => Ok(TaskStatus::Interrupt),
            "error" => Ok(TaskStatus::Error),
            "finished" => Ok(TaskStatus::Finished),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyTask {
    pub id: i64,
    pub source: String,
    pub target: String,
    pub status: TaskStatus,
    /// `(source folder, destination folder)` in creation order; the first
    /// entry is always the source root and its freshly created copy.
    pub folder_mapping: Vec<(String, String)>,
    pub copied_file_ids: HashSet<String>,
    pub created_at: i64,
    pub finished_at: Option<i64>,
}

impl CopyTask {
    pub fn dest_root(&self) -> Option<&str> {
        self.folder_mapping.first().map(|(_, dest)| dest.as_str())
    }

    pub fn mapping(&self) -> HashMap<String, String> {
        self.folder_mapping.iter().cloned().collect()
    }
}

/// What to do when a task for the same `(source, target)` already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeChoice {
    /// Keep the recorded mapping and copied files; only do what is missing.
    #[default]
    Continue,
    /// Forget prior progress and copy into a brand-new destination root.
    /// The previous partial copy is left in place.
    Restart,
    Exit,
}

/// Persisted state transitions of copy tasks.
#[derive(Clone)]
pub struct TaskTracker {
    store: Store,
}

impl TaskTracker {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Reclassifies tasks left in `copying` by a previous process as
    /// `interrupt`. Must run before any new work is scheduled.
    pub async fn recover_interrupted(&self) -> Result<u64, TaskError> {
        let count = self.store.interrupt_copying_tasks().await?;
        if count > 0 {
            warn!(count, "tasks from a previous run marked as interrupted");
        }
        Ok(count)
    }

    pub async fn find(&self, source: &str, target: &str) -> Result<Option<CopyTask>, TaskError> {
        Ok(self.store.find_task(source, target).await?)
    }

    pub async fn create(
        &self,
        source: &str,
        target: &str,
        dest_root: &str,
    ) -> Result<CopyTask, TaskError> {
        match self.store.insert_task(source, target, dest_root).await {
            Ok(task) => {
                info!(task_id = task.id, source, target, dest_root, "copy task created");
                Ok(task)
            }
            Err(StoreError::DuplicateTask {
                source_id,
                target_id,
            }) => Err(TaskError::AlreadyRunning {
                source_id,
                target_id,
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Re-enters `copying` for an existing task, keeping its progress.
    pub async fn resume(&self, task: &CopyTask) -> Result<CopyTask, TaskError> {
        self.claim(task).await?;
        info!(
            task_id = task.id,
            mapped_folders = task.folder_mapping.len(),
            copied_files = task.copied_file_ids.len(),
            "resuming copy task"
        );
        Ok(self.store.get_task(task.id).await?)
    }

    /// Re-enters `copying` with all progress discarded and `dest_root` as the
    /// new destination root.
    pub async fn restart(&self, task: &CopyTask, dest_root: &str) -> Result<CopyTask, TaskError> {
        self.claim(task).await?;
        info!(task_id = task.id, dest_root, "restarting copy task");
        Ok(self
            .store
            .reset_task_progress(task.id, &task.source, dest_root)
            .await?)
    }

    pub async fn record_folder(
        &self,
        task_id: i64,
        source_id: &str,
        dest_id: &str,
    ) -> Result<(), TaskError> {
        Ok(self
            .store
            .append_folder_mapping(task_id, source_id, dest_id)
            .await?)
    }

    pub async fn record_file(&self, task_id: i64, file_id: &str) -> Result<(), TaskError> {
        Ok(self.store.append_copied_file(task_id, file_id).await?)
    }

    pub async fn finish(&self, task_id: i64) -> Result<(), TaskError> {
        self.store
            .set_task_status(task_id, TaskStatus::Finished)
            .await?;
        info!(task_id, "copy task finished");
        Ok(())
    }

    pub async fn fail(&self, task_id: i64) -> Result<(), TaskError> {
        Ok(self.store.set_task_status(task_id, TaskStatus::Error).await?)
    }

    pub async fn interrupt(&self, task_id: i64) -> Result<(), TaskError> {
        self.store
            .set_task_status(task_id, TaskStatus::Interrupt)
            .await?;
        warn!(task_id, "copy task interrupted");
        Ok(())
    }

    /// Interrupts every task of this process that is still `copying`.
    pub async fn interrupt_all(&self) -> Result<u64, TaskError> {
        Ok(self.store.interrupt_copying_tasks().await?)
    }

    pub async fn list(&self, status: TaskStatus) -> Result<Vec<CopyTask>, TaskError> {
        Ok(self.store.list_tasks_with_status(status).await?)
    }

    async fn claim(&self, task: &CopyTask) -> Result<(), TaskError> {
        if self.store.claim_task(task.id).await? {
            Ok(())
        } else {
            Err(TaskError::AlreadyRunning {
                source_id: task.source.clone(),
                target_id: task.target.clone(),
            })
        }
    }
}
