use std::collections::HashSet;

use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{Store, StoreError, now_millis};
use crate::engine::task::{CopyTask, TaskStatus};

impl Store {
    pub async fn find_task(
        &self,
        source: &str,
        target: &str,
    ) -> Result<Option<CopyTask>, StoreError> {
        let row = sqlx::query(
            "SELECT id, source, target, status, created_at, finished_at
             FROM tasks WHERE source = ?1 AND target = ?2",
        )
        .bind(source)
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.hydrate_task(row).await?)),
            None => Ok(None),
        }
    }

    pub async fn get_task(&self, id: i64) -> Result<CopyTask, StoreError> {
        let row = sqlx::query(
            "SELECT id, source, target, status, created_at, finished_at FROM tasks WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::MissingTask(id))?;
        self.hydrate_task(row).await
    }

    pub async fn list_tasks_with_status(
        &self,
        status: TaskStatus,
    ) -> Result<Vec<CopyTask>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, source, target, status, created_at, finished_at
             FROM tasks WHERE status = ?1 ORDER BY id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.hydrate_task(row).await?);
        }
        Ok(out)
    }

    /// Inserts a task already in `copying`, with `(source, dest_root)` as
    /// the first mapping entry.
    pub async fn insert_task(
        &self,
        source: &str,
        target: &str,
        dest_root: &str,
    ) -> Result<CopyTask, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = sqlx::query(
            "INSERT INTO tasks (source, target, status, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(source)
        .bind(target)
        .bind(TaskStatus::Copying.as_str())
        .bind(now_millis())
        .execute(&mut *tx)
        .await;
        let id = match inserted {
            Ok(result) => result.last_insert_rowid(),
            Err(err) if is_unique_violation(&err) => {
                return Err(StoreError::DuplicateTask {
                    source_id: source.to_string(),
                    target_id: target.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };
        sqlx::query(
            "INSERT INTO task_folder_mapping (task_id, source_id, dest_id) VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(source)
        .bind(dest_root)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.get_task(id).await
    }

    /// Moves a task into `copying` unless it already is. Returns false when
    /// another run holds it.
    pub async fn claim_task(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE tasks SET status = ?1, finished_at = NULL WHERE id = ?2 AND status <> ?1",
        )
        .bind(TaskStatus::Copying.as_str())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn set_task_status(&self, id: i64, status: TaskStatus) -> Result<(), StoreError> {
        let finished_at = (status == TaskStatus::Finished).then(now_millis);
        sqlx::query("UPDATE tasks SET status = ?1, finished_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(finished_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Flips every `copying` row to `interrupt`; returns the number of rows touched.
    pub async fn interrupt_copying_tasks(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE tasks SET status = ?1 WHERE status = ?2")
            .bind(TaskStatus::Interrupt.as_str())
            .bind(TaskStatus::Copying.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn append_folder_mapping(
        &self,
        task_id: i64,
        source_id: &str,
        dest_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO task_folder_mapping (task_id, source_id, dest_id) VALUES (?1, ?2, ?3)
             ON CONFLICT(task_id, source_id) DO NOTHING",
        )
        .bind(task_id)
        .bind(source_id)
        .bind(dest_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn append_copied_file(&self, task_id: i64, file_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO task_copied_files (task_id, file_id) VALUES (?1, ?2)
             ON CONFLICT(task_id, file_id) DO NOTHING",
        )
        .bind(task_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drops all recorded progress, re-seeds the mapping with a new root and
    /// puts the task back into `copying`.
    pub async fn reset_task_progress(
        &self,
        id: i64,
        source: &str,
        dest_root: &str,
    ) -> Result<CopyTask, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM task_folder_mapping WHERE task_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM task_copied_files WHERE task_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO task_folder_mapping (task_id, source_id, dest_id) VALUES (?1, ?2, ?3)",
        )
        .bind(id)
        .bind(source)
        .bind(dest_root)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE tasks SET status = ?1, finished_at = NULL WHERE id = ?2")
            .bind(TaskStatus::Copying.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        self.get_task(id).await
    }

    async fn hydrate_task(&self, row: SqliteRow) -> Result<CopyTask, StoreError> {
        let id: i64 = row.try_get("id")?;
        let status: String = row.try_get("status")?;

        let mapping_rows = sqlx::query(
            "SELECT source_id, dest_id FROM task_folder_mapping WHERE task_id = ?1 ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        let mut folder_mapping: Vec<(String, String)> = Vec::with_capacity(mapping_rows.len());
        for mapping in mapping_rows {
            folder_mapping.push((mapping.try_get("source_id")?, mapping.try_get("dest_id")?));
        }

        let copied_rows = sqlx::query("SELECT file_id FROM task_copied_files WHERE task_id = ?1")
            .bind(id)
            .fetch_all(&self.pool)
            .await?;
        let copied_file_ids = copied_rows
            .into_iter()
            .map(|row| row.try_get::<String, _>("file_id"))
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(CopyTask {
            id,
            source: row.try_get("source")?,
            target: row.try_get("target")?,
            status: TaskStatus::parse(&status)?,
            folder_mapping,
            copied_file_ids,
            created_at: row.try_get("created_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_task_seeds_root_mapping() {
        let store = Store::open_in_memory().await.unwrap();
        let task = store.insert_task("src", "dst", "new-root").await.unwrap();

        assert_eq!(task.status, TaskStatus::Copying);
        assert_eq!(
            task.folder_mapping,
            vec![("src".to_string(), "new-root".to_string())]
        );
        assert!(task.copied_file_ids.is_empty());
        assert!(task.finished_at.is_none());
    }

    #[tokio::test]
    async fn insert_task_rejects_same_pair() {
        let store = Store::open_in_memory().await.unwrap();
        store.insert_task("src", "dst", "root-a").await.unwrap();
        let err = store.insert_task("src", "dst", "root-b").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateTask { .. }));
        assert_eq!(err.to_string(), "a task for src -> dst already exists");
    }

    #[tokio::test]
    async fn appends_keep_order_and_ignore_repeats() {
        let store = Store::open_in_memory().await.unwrap();
        let task = store.insert_task("src", "dst", "root").await.unwrap();
        store.append_folder_mapping(task.id, "a", "a2").await.unwrap();
        store.append_folder_mapping(task.id, "b", "b2").await.unwrap();
        store.append_folder_mapping(task.id, "a", "a3").await.unwrap();
        store.append_copied_file(task.id, "f1").await.unwrap();
        store.append_copied_file(task.id, "f1").await.unwrap();

        let task = store.get_task(task.id).await.unwrap();
        let sources: Vec<_> = task.folder_mapping.iter().map(|(s, _)| s.as_str()).collect();
        assert_eq!(sources, vec!["src", "a", "b"]);
        assert_eq!(task.folder_mapping[1].1, "a2");
        assert_eq!(task.copied_file_ids.len(), 1);
    }

    #[tokio::test]
    async fn claim_is_rejected_while_copying() {
        let store = Store::open_in_memory().await.unwrap();
        let task = store.insert_task("src", "dst", "root").await.unwrap();
        assert!(!store.claim_task(task.id).await.unwrap());

        store
            .set_task_status(task.id, TaskStatus::Interrupt)
            .await
            .unwrap();
        assert!(store.claim_task(task.id).await.unwrap());
        assert!(!store.claim_task(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn reset_progress_replaces_root_and_clears_files() {
        let store = Store::open_in_memory().await.unwrap();
        let task = store.insert_task("src", "dst", "old-root").await.unwrap();
        store.append_folder_mapping(task.id, "a", "a2").await.unwrap();
        store.append_copied_file(task.id, "f1").await.unwrap();
        store.set_task_status(task.id, TaskStatus::Error).await.unwrap();

        let task = store
            .reset_task_progress(task.id, "src", "new-root")
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Copying);
        assert_eq!(
            task.folder_mapping,
            vec![("src".to_string(), "new-root".to_string())]
        );
        assert!(task.copied_file_ids.is_empty());
    }

    #[tokio::test]
    async fn interrupt_copying_tasks_only_touches_copying_rows() {
        let store = Store::open_in_memory().await.unwrap();
        let running = store.insert_task("a", "t", "r1").await.unwrap();
        let done = store.insert_task("b", "t", "r2").await.unwrap();
        store.set_task_status(done.id, TaskStatus::Finished).await.unwrap();

        assert_eq!(store.interrupt_copying_tasks().await.unwrap(), 1);
        assert_eq!(
            store.get_task(running.id).await.unwrap().status,
            TaskStatus::Interrupt
        );
        let done = store.get_task(done.id).await.unwrap();
        assert_eq!(done.status, TaskStatus::Finished);
        assert!(done.finished_at.is_some());
    }
}
