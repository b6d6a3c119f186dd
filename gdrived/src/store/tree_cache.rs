use sqlx::Row;

use super::{Store, StoreError};
use crate::engine::node::RemoteNode;

/// A folder listing as persisted in the `tree_cache` table.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredListing {
    pub children: Vec<RemoteNode>,
    pub subfolder_ids: Vec<String>,
    pub fetched_at: i64,
}

impl Store {
    pub async fn get_listing(&self, folder_id: &str) -> Result<Option<StoredListing>, StoreError> {
        let row = sqlx::query(
            "SELECT children, subfolder_ids, fetched_at FROM tree_cache WHERE folder_id = ?1",
        )
        .bind(folder_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let children: String = row.try_get("children")?;
        let subfolder_ids: String = row.try_get("subfolder_ids")?;
        let corrupt = |source| StoreError::CorruptListing {
            folder_id: folder_id.to_string(),
            source,
        };
        Ok(Some(StoredListing {
            children: serde_json::from_str(&children).map_err(corrupt)?,
            subfolder_ids: serde_json::from_str(&subfolder_ids).map_err(corrupt)?,
            fetched_at: row.try_get("fetched_at")?,
        }))
    }

    pub async fn put_listing(
        &self,
        folder_id: &str,
        listing: &StoredListing,
    ) -> Result<(), StoreError> {
        let corrupt = |source| StoreError::CorruptListing {
            folder_id: folder_id.to_string(),
            source,
        };
        let children = serde_json::to_string(&listing.children).map_err(corrupt)?;
        let subfolder_ids = serde_json::to_string(&listing.subfolder_ids).map_err(corrupt)?;
        sqlx::query(
            "INSERT INTO tree_cache (folder_id, children, subfolder_ids, fetched_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(folder_id) DO UPDATE SET
                children = excluded.children,
                subfolder_ids = excluded.subfolder_ids,
                fetched_at = excluded.fetched_at",
        )
        .bind(folder_id)
        .bind(children)
        .bind(subfolder_ids)
        .bind(listing.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_listing(&self, folder_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM tree_cache WHERE folder_id = ?1")
            .bind(folder_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::{file, folder};

    fn listing(fetched_at: i64) -> StoredListing {
        StoredListing {
            children: vec![folder("sub-1", "root-1", "Sub"), file("f-1", "root-1", Some("h"), 3)],
            subfolder_ids: vec!["sub-1".into()],
            fetched_at,
        }
    }

    #[tokio::test]
    async fn put_and_get_listing() {
        let store = Store::open_in_memory().await.unwrap();
        store.put_listing("root-1", &listing(10)).await.unwrap();

        let fetched = store.get_listing("root-1").await.unwrap().unwrap();
        assert_eq!(fetched, listing(10));
        assert!(store.get_listing("other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites_and_delete_removes() {
        let store = Store::open_in_memory().await.unwrap();
        store.put_listing("root-1", &listing(10)).await.unwrap();
        store.put_listing("root-1", &listing(20)).await.unwrap();
        assert_eq!(
            store.get_listing("root-1").await.unwrap().unwrap().fetched_at,
            20
        );

        store.delete_listing("root-1").await.unwrap();
        assert!(store.get_listing("root-1").await.unwrap().is_none());
    }
}
