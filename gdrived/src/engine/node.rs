use gdrive_core::DriveFile;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    File,
    Folder,
}

/// One file or folder of a crawled tree. `parent_id` is assigned by the
/// crawler from the folder that was listed, never taken from the store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl RemoteNode {
    pub fn from_drive_file(file: DriveFile, parent_id: &str) -> Self {
        let kind = if file.is_folder() {
            NodeKind::Folder
        } else {
            NodeKind::File
        };
        Self {
            id: file.id,
            name: file.name,
            kind,
            size: file.size,
            content_hash: file.md5_checksum,
            parent_id: Some(parent_id.to_string()),
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    pub fn parent(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }
}

#[cfg(test)]
pub(crate) fn file(id: &str, parent: &str, hash: Option<&str>, size: u64) -> RemoteNode {
    RemoteNode {
        id: id.to_string(),
        name: format!("{id}.bin"),
        kind: NodeKind::File,
        size: Some(size),
        content_hash: hash.map(str::to_string),
        parent_id: Some(parent.to_string()),
    }
}

#[cfg(test)]
pub(crate) fn folder(id: &str, parent: &str, name: &str) -> RemoteNode {
    RemoteNode {
        id: id.to_string(),
        name: name.to_string(),
        kind: NodeKind::Folder,
        size: None,
        content_hash: None,
        parent_id: Some(parent.to_string()),
    }
}
