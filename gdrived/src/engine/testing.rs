use std::sync::Arc;
use std::time::Duration;

use gdrive_core::{DriveClient, FOLDER_MIME_TYPE};
use serde_json::{Value, json};
use wiremock::MockServer;

use super::executor::RequestExecutor;
use super::limiter::ConcurrencyLimiter;
use super::timeout::TimeoutPolicy;
use crate::credentials::{CredentialPool, StaticTokenSource, TokenSource};
use crate::store::Store;

pub(crate) struct Harness {
    pub server: MockServer,
    pub store: Store,
    pub executor: RequestExecutor,
}

pub(crate) async fn harness() -> Harness {
    let primary: Arc<dyn TokenSource> = Arc::new(StaticTokenSource::new("primary", "tok"));
    harness_with_pool(CredentialPool::new(Some(primary), Vec::new())).await
}

pub(crate) async fn harness_with_pool(pool: CredentialPool) -> Harness {
    let server = MockServer::start().await;
    let executor = RequestExecutor::new(
        DriveClient::with_base_url(&server.uri()).unwrap(),
        Arc::new(pool),
        ConcurrencyLimiter::new(4),
        TimeoutPolicy::new(Duration::from_millis(500), Duration::from_secs(2)),
        2,
    );
    Harness {
        server,
        store: Store::open_in_memory().await.unwrap(),
        executor,
    }
}

pub(crate) fn drive_folder(id: &str, name: &str) -> Value {
    json!({ "id": id, "name": name, "mimeType": FOLDER_MIME_TYPE })
}

pub(crate) fn drive_file(id: &str, hash: &str, size: u64) -> Value {
    json!({
        "id": id,
        "name": format!("{id}.bin"),
        "mimeType": "application/octet-stream",
        "size": size.to_string(),
        "md5Checksum": hash,
    })
}

pub(crate) fn page(files: Vec<Value>, next: Option<&str>) -> Value {
    match next {
        Some(token) => json!({ "files": files, "nextPageToken": token }),
        None => json!({ "files": files }),
    }
}

pub(crate) fn parents_query(folder_id: &str) -> String {
    format!("'{folder_id}' in parents and trashed = false")
}
