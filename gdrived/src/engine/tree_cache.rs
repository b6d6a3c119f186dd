use std::collections::HashSet;

use tracing::debug;

use super::node::RemoteNode;
use crate::store::{Store, StoreError, StoredListing, now_millis};

/// The immediate children of one folder.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeCacheEntry {
    pub children: Vec<RemoteNode>,
    pub subfolder_ids: Vec<String>,
    pub fetched_at: i64,
    /// False when the listing stopped early; such entries are never stored.
    pub complete: bool,
}

impl TreeCacheEntry {
    pub fn from_listing(children: Vec<RemoteNode>, complete: bool) -> Self {
        let subfolder_ids = children
            .iter()
            .filter(|node| node.is_folder())
            .map(|node| node.id.clone())
            .collect();
        Self {
            children,
            subfolder_ids,
            fetched_at: now_millis(),
            complete,
        }
    }
}

/// Persistent memo of folder listings.
#[derive(Clone)]
pub struct TreeCache {
    store: Store,
}

impl TreeCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get(&self, folder_id: &str) -> Result<Option<TreeCacheEntry>, StoreError> {
        let Some(listing) = self.store.get_listing(folder_id).await? else {
            return Ok(None);
        };
        let mut children = listing.children;
        for child in &mut children {
            child.parent_id = Some(folder_id.to_string());
        }
        Ok(Some(TreeCacheEntry {
            children,
            subfolder_ids: listing.subfolder_ids,
            fetched_at: listing.fetched_at,
            complete: true,
        }))
    }

    /// Stores `entry` unless it is incomplete; returns whether it was stored.
    pub async fn put(&self, folder_id: &str, entry: &TreeCacheEntry) -> Result<bool, StoreError> {
        if !entry.complete {
            debug!(folder_id, "not caching partial listing");
            return Ok(false);
        }
        self.store
            .put_listing(
                folder_id,
                &StoredListing {
                    children: entry.children.clone(),
                    subfolder_ids: entry.subfolder_ids.clone(),
                    fetched_at: entry.fetched_at,
                },
            )
            .await?;
        Ok(true)
    }

    pub async fn invalidate(&self, folder_id: &str) -> Result<(), StoreError> {
        self.store.delete_listing(folder_id).await
    }

    /// Rebuilds the subtree under `root_id` from cached listings, in the same
    /// order a crawl produces: a folder's children, then each sub-folder's
    /// subtree. Returns `None` as soon as any folder of the subtree has no
    /// cached listing, so callers never see a silently truncated tree.
    pub async fn resolve_subtree(
        &self,
        root_id: &str,
    ) -> Result<Option<Vec<RemoteNode>>, StoreError> {
        let mut nodes = Vec::new();
        let mut stack = vec![root_id.to_string()];
        let mut seen = HashSet::new();
        while let Some(folder_id) = stack.pop() {
            if !seen.insert(folder_id.clone()) {
                continue;
            }
            let Some(entry) = self.get(&folder_id).await? else {
                debug!(%folder_id, "cached subtree is incomplete");
                return Ok(None);
            };
            nodes.extend(entry.children);
            stack.extend(entry.subfolder_ids.into_iter().rev());
        }
        Ok(Some(nodes))
    }
}
