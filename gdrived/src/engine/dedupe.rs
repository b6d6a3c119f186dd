use std::collections::{HashMap, HashSet};

use futures_util::future::join_all;
use gdrive_core::RequestSpec;
use serde::Serialize;
use tracing::{info, warn};

use super::executor::RequestExecutor;
use super::node::RemoteNode;
use crate::credentials::CredentialMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalMode {
    /// Move to the trash; recoverable.
    #[default]
    Trash,
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Duplicates {
    pub files: Vec<RemoteNode>,
    pub folders: Vec<RemoteNode>,
}

impl Duplicates {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.folders.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len() + self.folders.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupeReport {
    pub files: usize,
    pub folders: usize,
    /// Ids whose removal failed.
    pub failed: Vec<String>,
}

pub struct Deduper {
    executor: RequestExecutor,
    mode: CredentialMode,
}

impl Deduper {
    pub fn new(executor: RequestExecutor, mode: CredentialMode) -> Self {
        Self { executor, mode }
    }

    /// Siblings are compared only with siblings. Files match on content
    /// hash and the first one in crawl order survives; files without a hash
    /// never match. Folders match on name; a group of same-named folders is
    /// reported in full when all of them are empty, and not at all otherwise.
    pub fn find_duplicates(nodes: &[RemoteNode]) -> Duplicates {
        let parents: HashSet<&str> = nodes.iter().filter_map(RemoteNode::parent).collect();

        let mut seen_files = HashSet::new();
        let mut files = Vec::new();
        let mut folder_groups: HashMap<(Option<&str>, &str), Vec<&RemoteNode>> = HashMap::new();
        let mut group_order = Vec::new();

        for node in nodes {
            if node.is_folder() {
                let key = (node.parent(), node.name.as_str());
                let group = folder_groups.entry(key).or_default();
                if group.is_empty() {
                    group_order.push(key);
                }
                group.push(node);
            } else if let Some(hash) = node.content_hash.as_deref()
                && !seen_files.insert((node.parent(), hash))
            {
                files.push(node.clone());
            }
        }

        let mut folders = Vec::new();
        for key in group_order {
            let group = &folder_groups[&key];
            if group.len() < 2 || group.iter().any(|f| parents.contains(f.id.as_str())) {
                continue;
            }
            folders.extend(group.iter().map(|f| (*f).clone()));
        }

        Duplicates { files, folders }
    }

    /// Removes every duplicate. Failures are logged and collected; they
    /// never stop the rest of the batch.
    pub async fn remove(&self, duplicates: &Duplicates, removal: RemovalMode) -> DedupeReport {
        let targets = duplicates.files.iter().chain(duplicates.folders.iter());
        let results = join_all(targets.map(|node| self.remove_one(node, removal))).await;

        let failed: Vec<String> = results.into_iter().flatten().collect();
        let report = DedupeReport {
            files: duplicates
                .files
                .iter()
                .filter(|f| !failed.contains(&f.id))
                .count(),
            folders: duplicates
                .folders
                .iter()
                .filter(|f| !failed.contains(&f.id))
                .count(),
            failed,
        };
        info!(
            files = report.files,
            folders = report.folders,
            failed = report.failed.len(),
            ?removal,
            "duplicates removed"
        );
        report
    }

    pub async fn trash(&self, duplicates: &Duplicates) -> DedupeReport {
        self.remove(duplicates, RemovalMode::Trash).await
    }

    async fn remove_one(&self, node: &RemoteNode, removal: RemovalMode) -> Option<String> {
        let spec = match removal {
            RemovalMode::Trash => RequestSpec::trash(&node.id),
            RemovalMode::Delete => RequestSpec::delete(&node.id),
        };
        match self.executor.execute(&spec, self.mode).await {
            Ok(_) => None,
            Err(err) => {
                warn!(id = %node.id, name = %node.name, error = %err, "failed to remove duplicate");
                Some(node.id.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::node::{file, folder};
    use crate::engine::testing::harness;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, ResponseTemplate};

    fn ids(nodes: &[RemoteNode]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn keeps_first_of_identical_siblings() {
        let nodes = vec![
            file("f1", "r", Some("h"), 1),
            file("f2", "r", Some("h"), 1),
            file("f3", "r", Some("h"), 1),
        ];
        let dupes = Deduper::find_duplicates(&nodes);
        assert_eq!(ids(&dupes.files), vec!["f2", "f3"]);
        assert!(dupes.folders.is_empty());
    }

    #[test]
    fn same_hash_under_different_parents_is_not_a_duplicate() {
        let nodes = vec![
            folder("1", "R", "FolderA"),
            file("2", "R", Some("h"), 1),
            file("3", "1", Some("h"), 1),
        ];
        assert!(Deduper::find_duplicates(&nodes).is_empty());
    }

    #[test]
    fn files_without_hash_are_ignored() {
        let nodes = vec![file("f1", "r", None, 1), file("f2", "r", None, 1)];
        assert!(Deduper::find_duplicates(&nodes).is_empty());
    }

    #[test]
    fn only_all_empty_folder_groups_are_flagged() {
        let empty = vec![folder("a", "r", "Docs"), folder("b", "r", "Docs")];
        assert_eq!(ids(&Deduper::find_duplicates(&empty).folders), vec!["a", "b"]);

        let one_full = vec![
            folder("a", "r", "Docs"),
            folder("b", "r", "Docs"),
            file("x", "a", Some("h"), 1),
        ];
        assert!(Deduper::find_duplicates(&one_full).folders.is_empty());

        let cousins = vec![folder("a", "r", "Docs"), folder("b", "s", "Docs")];
        assert!(Deduper::find_duplicates(&cousins).folders.is_empty());
    }

    #[tokio::test]
    async fn trash_reports_failures_without_stopping() {
        let h = harness().await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/f2"))
            .and(body_json(serde_json::json!({ "trashed": true })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&h.server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/f3"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&h.server)
            .await;
        Mock::given(method("PATCH"))
            .and(path("/drive/v3/files/b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&h.server)
            .await;

        let dupes = Duplicates {
            files: vec![file("f2", "r", Some("h"), 1), file("f3", "r", Some("h"), 1)],
            folders: vec![folder("b", "r", "Docs")],
        };
        let report = Deduper::new(h.executor.clone(), CredentialMode::Primary)
            .trash(&dupes)
            .await;

        assert_eq!(report.files, 1);
        assert_eq!(report.folders, 1);
        assert_eq!(report.failed, vec!["f3".to_string()]);
    }

    #[tokio::test]
    async fn delete_mode_issues_delete() {
        let h = harness().await;
        Mock::given(method("DELETE"))
            .and(path("/drive/v3/files/f2"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&h.server)
            .await;

        let dupes = Duplicates {
            files: vec![file("f2", "r", Some("h"), 1)],
            folders: Vec::new(),
        };
        let report = Deduper::new(h.executor.clone(), CredentialMode::Primary)
            .remove(&dupes, RemovalMode::Delete)
            .await;
        assert!(report.failed.is_empty());
        assert_eq!(report.files, 1);
    }
}
