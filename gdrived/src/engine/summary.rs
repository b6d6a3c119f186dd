use std::collections::HashMap;

use serde::Serialize;

use super::node::RemoteNode;

pub const NO_EXTENSION: &str = "(none)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionStat {
    pub extension: String,
    pub count: usize,
    pub bytes: u64,
}

/// Totals of a crawled tree, grouped by file extension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeSummary {
    pub files: usize,
    pub folders: usize,
    pub total_bytes: u64,
    /// Largest first; ties broken by extension name.
    pub by_extension: Vec<ExtensionStat>,
}

impl TreeSummary {
    pub fn from_nodes(nodes: &[RemoteNode]) -> Self {
        let mut summary = TreeSummary::default();
        let mut groups: HashMap<String, (usize, u64)> = HashMap::new();
        for node in nodes {
            if node.is_folder() {
                summary.folders += 1;
                continue;
            }
            let size = node.size.unwrap_or(0);
            summary.files += 1;
            summary.total_bytes += size;
            let entry = groups.entry(extension_of(&node.name)).or_default();
            entry.0 += 1;
            entry.1 += size;
        }

        summary.by_extension = groups
            .into_iter()
            .map(|(extension, (count, bytes))| ExtensionStat {
                extension,
                count,
                bytes,
            })
            .collect();
        summary
            .by_extension
            .sort_by(|a, b| b.bytes.cmp(&a.bytes).then_with(|| a.extension.cmp(&b.extension)));
        summary
    }
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => ext.to_lowercase(),
        _ => NO_EXTENSION.to_string(),
    }
}
