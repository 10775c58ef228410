//! Polling and archive assertions

use irods_stage::{DownloadService, TaskId, TaskStatus};
use std::io::Cursor;
use std::time::Duration;
use tokio::io::AsyncReadExt;

/// Result of waiting for a task
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// Task published its artifact
    Succeeded(String),
    /// Task failed
    Failed,
    /// Still pending when the timeout hit
    Timeout,
}

/// Poll a task until it leaves pending
pub async fn wait_for_task(
    service: &DownloadService,
    task_id: TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match service.poll_task(task_id).await.unwrap() {
                TaskStatus::Pending => tokio::time::sleep(Duration::from_millis(25)).await,
                TaskStatus::Succeeded { payload } => return WaitResult::Succeeded(payload),
                TaskStatus::Failed { .. } => return WaitResult::Failed,
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}

/// Sorted entry names of a zip held in the vault
pub async fn zip_entry_names(service: &DownloadService, path: &str) -> Vec<String> {
    let mut reader = service.store().open_read(path).await.unwrap();
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).await.unwrap();
    zip_entry_names_from_bytes(bytes)
}

/// Sorted entry names of an in-memory zip
pub fn zip_entry_names_from_bytes(bytes: Vec<u8>) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    names
}

/// Contents of one zip entry
pub fn zip_entry(bytes: &[u8], name: &str) -> String {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut contents = String::new();
    std::io::Read::read_to_string(&mut entry, &mut contents).unwrap();
    contents
}
