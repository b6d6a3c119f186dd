use reqwest::Method;
use serde_json::{Value, json};

use crate::client::FOLDER_MIME_TYPE;

pub const MAX_PAGE_SIZE: u32 = 1000;

const FILES_PATH: &str = "/drive/v3/files";
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, md5Checksum)";
const LIST_ORDER: &str = "folder,name desc";

/// A single remote call, described independently of the credential that
/// will eventually authorize it. Retried calls reuse the same spec.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl RequestSpec {
    fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// One page of the non-trashed children of `folder_id`.
    ///
    /// The `root` alias lives in the user's own drive, so the shared-drive
    /// flags are never sent for it.
    pub fn list_children(
        folder_id: &str,
        page_token: Option<&str>,
        page_size: u32,
        all_drives: bool,
    ) -> Self {
        let mut spec = Self::new(Method::GET, FILES_PATH)
            .param("q", format!("'{folder_id}' in parents and trashed = false"))
            .param("orderBy", LIST_ORDER)
            .param("fields", LIST_FIELDS)
            .param("pageSize", page_size.clamp(1, MAX_PAGE_SIZE).to_string());
        if all_drives && folder_id != "root" {
            spec = spec
                .param("includeItemsFromAllDrives", "true")
                .param("supportsAllDrives", "true");
        }
        if let Some(token) = page_token {
            spec = spec.param("pageToken", token);
        }
        spec
    }

    pub fn create_folder(name: &str, parent_id: &str) -> Self {
        Self::new(Method::POST, FILES_PATH)
            .param("supportsAllDrives", "true")
            .json(json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent_id],
            }))
    }

    pub fn copy_file(file_id: &str, new_parent_id: &str) -> Self {
        Self::new(Method::POST, format!("{FILES_PATH}/{file_id}/copy"))
            .param("supportsAllDrives", "true")
            .json(json!({ "parents": [new_parent_id] }))
    }

    pub fn get_metadata(id: &str) -> Self {
        Self::new(Method::GET, format!("{FILES_PATH}/{id}"))
            .param("includeItemsFromAllDrives", "true")
            .param("supportsAllDrives", "true")
            .param("corpora", "allDrives")
            .param("fields", "id,name")
    }

    /// Soft delete: the item is moved to the trash and can be restored.
    pub fn trash(id: &str) -> Self {
        Self::new(Method::PATCH, format!("{FILES_PATH}/{id}"))
            .param("supportsAllDrives", "true")
            .json(json!({ "trashed": true }))
    }

    pub fn delete(id: &str) -> Self {
        Self::new(Method::DELETE, format!("{FILES_PATH}/{id}")).param("supportsAllDrives", "true")
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
