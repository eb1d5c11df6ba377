/* src/server/listing.rs */

use crate::ingest::stats::{FileEntry, StatsCache};
use futures_util::future::join_all;
use log::warn;
use std::cmp::Ordering;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as tokio_fs;

/// Stored files, newest first. Metadata for each file is gathered in its own task;
/// files whose metadata fails or does not arrive within `per_file_timeout` are left out.
pub async fn collect_entries(
    stats: Arc<StatsCache>,
    per_file_timeout: Duration,
) -> io::Result<Vec<FileEntry>> {
    let mut dir = match tokio_fs::read_dir(stats.upload_dir()).await {
        Ok(dir) => dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut pending = Vec::new();
    while let Some(entry) = dir.next_entry().await? {
        match entry.file_type().await {
            Ok(kind) if kind.is_file() => {}
            _ => continue,
        }
        let path = entry.path();
        let stats = stats.clone();
        let handle = tokio::spawn(async move { stats.file_entry(&path).await });
        pending.push(async move { tokio::time::timeout(per_file_timeout, handle).await });
    }

    let mut files: Vec<FileEntry> = Vec::with_capacity(pending.len());
    for outcome in join_all(pending).await {
        match outcome {
            Ok(Ok(Ok(Some(entry)))) => files.push(entry),
            Ok(Ok(Ok(None))) => {}
            Ok(Ok(Err(e))) => warn!("! Skipping unreadable file in listing: {}", e),
            Ok(Err(e)) => warn!("! Metadata task failed: {}", e),
            Err(_) => warn!("! Metadata for a file timed out after {:?}; skipped.", per_file_timeout),
        }
    }

    files.sort_by(|a, b| b.modified.partial_cmp(&a.modified).unwrap_or(Ordering::Equal));
    Ok(files)
}
