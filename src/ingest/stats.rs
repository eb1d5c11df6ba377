/* src/ingest/stats.rs */

use super::MediaKind;
use super::validate::media_kind;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;

/// Formats a byte count the way the listing and stats endpoints report it (`1.5MB`).
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", size, UNITS[unit])
}

/// Average throughput over `duration`, e.g. `12.4 MB/s`.
pub fn format_speed(bytes: u64, duration: Duration) -> String {
    let seconds = duration.as_secs_f64();
    if seconds < 1e-6 {
        return "N/A".to_string();
    }
    format!("{:.1} MB/s", bytes as f64 / (1024.0 * 1024.0) / seconds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub file_count: usize,
    pub total_bytes: u64,
}

/// Listing entry for one stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    pub size_formatted: String,
    pub modified: f64,
    pub original_name: String,
    pub kind: MediaKind,
    pub mime_type: String,
}

/// Derived views of the upload directory. Everything here can be thrown away and
/// rebuilt from a rescan; writes call `invalidate`.
pub struct StatsCache {
    upload_dir: PathBuf,
    aggregate: Mutex<Option<Stats>>,
    entries: Mutex<HashMap<(PathBuf, SystemTime), FileEntry>>,
    // final name -> name the client declared; lost on restart, listing falls back to the final name
    origins: Mutex<HashMap<String, String>>,
}

impl StatsCache {
    pub fn new(upload_dir: PathBuf) -> Self {
        StatsCache {
            upload_dir,
            aggregate: Mutex::new(None),
            entries: Mutex::new(HashMap::new()),
            origins: Mutex::new(HashMap::new()),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub async fn invalidate(&self) {
        *self.aggregate.lock().await = None;
        self.entries.lock().await.clear();
    }

    pub async fn record_origin(&self, final_name: &str, declared_name: &str) {
        self.origins
            .lock()
            .await
            .insert(final_name.to_string(), declared_name.to_string());
    }

    pub async fn cache_entries(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn get(&self) -> io::Result<Stats> {
        if let Some(stats) = *self.aggregate.lock().await {
            return Ok(stats);
        }
        let stats = self.rescan().await?;
        *self.aggregate.lock().await = Some(stats);
        Ok(stats)
    }

    async fn rescan(&self) -> io::Result<Stats> {
        let mut stats = Stats {
            file_count: 0,
            total_bytes: 0,
        };
        let mut entries = match tokio_fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if media_kind(&name).is_none() {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_file() {
                stats.file_count += 1;
                stats.total_bytes += meta.len();
            }
        }
        Ok(stats)
    }

    /// Metadata for one stored file, served from the cache while its mtime is unchanged.
    pub async fn file_entry(&self, path: &Path) -> io::Result<Option<FileEntry>> {
        let meta = tokio_fs::metadata(path).await?;
        if !meta.is_file() {
            return Ok(None);
        }
        let modified = meta.modified()?;
        let key = (path.to_path_buf(), modified);
        if let Some(hit) = self.entries.lock().await.get(&key) {
            return Ok(Some(hit.clone()));
        }

        let name = match path.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => return Ok(None),
        };
        let Some(kind) = media_kind(&name) else {
            return Ok(None);
        };
        let original_name = self
            .origins
            .lock()
            .await
            .get(&name)
            .cloned()
            .unwrap_or_else(|| name.clone());
        let entry = FileEntry {
            size: meta.len(),
            size_formatted: format_file_size(meta.len()),
            modified: modified
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
            original_name,
            kind,
            mime_type: mime_guess::from_path(path)
                .first()
                .map(|m| m.essence_str().to_string())
                .unwrap_or_else(|| "unknown".to_string()),
            name,
        };
        self.entries.lock().await.insert(key, entry.clone());
        Ok(Some(entry))
    }
}
