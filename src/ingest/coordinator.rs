/* src/ingest/coordinator.rs */

use super::chunks::{Assembled, ChunkAssembler, ChunkStatus};
use super::limiter::{Admission, RateLimiter};
use super::naming::{NameResolver, sanitize};
use super::normalize::Normalizer;
use super::stats::StatsCache;
use super::validate::{Rejection, Validator};
use super::{IngestError, IngestResult, StoredFile};
use crate::setup::config::Config;
use futures_util::future::join_all;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs as tokio_fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;

/// Limits that may be changed while the server runs. Read once per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub max_file_size: u64,
}

/// One file of a multi-file request, already read off the wire.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub declared_name: String,
    pub mime_hint: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkUpload<'a> {
    pub declared_name: &'a str,
    pub index: u32,
    pub total_chunks: u32,
    pub total_size: Option<u64>,
    pub bytes: &'a [u8],
}

/// Per-file outcome of a batch. Some files may fail while others are stored.
#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchSummary {
    pub stored: Vec<StoredFile>,
    pub errors: Vec<String>,
}

impl BatchSummary {
    pub fn is_partial(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.stored.iter().map(|f| f.size).sum()
    }
}

/// Removes a reserved file unless the upload that owns it is committed. Runs on early
/// returns and when the upload future is dropped, e.g. by an aborted batch task.
struct PartialFile {
    path: Option<PathBuf>,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        PartialFile { path: Some(path) }
    }

    fn commit(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(&path);
        }
    }
}

pub struct UploadCoordinator {
    upload_dir: PathBuf,
    io_chunk_size: usize,
    batch_timeout: Duration,
    limits: RwLock<Limits>,
    limiter: RateLimiter,
    resolver: Arc<NameResolver>,
    assembler: ChunkAssembler,
    normalizer: Normalizer,
    stats: Arc<StatsCache>,
}

impl UploadCoordinator {
    pub fn from_config(cfg: &Config) -> Self {
        let upload_dir = cfg.upload_dir();
        let resolver = Arc::new(NameResolver::new());
        UploadCoordinator {
            io_chunk_size: cfg.upload.io_chunk_size.max(1),
            batch_timeout: cfg.batch_timeout(),
            limits: RwLock::new(Limits {
                max_file_size: cfg.upload.max_file_size,
            }),
            limiter: RateLimiter::new(cfg.rate_limit.max_requests, cfg.rate_window()),
            assembler: ChunkAssembler::new(upload_dir.clone(), cfg.temp_dir(), resolver.clone()),
            normalizer: Normalizer::new(
                cfg.upload.normalize_extensions,
                upload_dir.clone(),
                resolver.clone(),
            ),
            stats: Arc::new(StatsCache::new(upload_dir.clone())),
            resolver,
            upload_dir,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn stats(&self) -> Arc<StatsCache> {
        self.stats.clone()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn assembler(&self) -> &ChunkAssembler {
        &self.assembler
    }

    pub async fn limits(&self) -> Limits {
        *self.limits.read().await
    }

    pub async fn set_max_file_size(&self, max_file_size: u64) -> IngestResult<Limits> {
        if max_file_size == 0 {
            return Err(IngestError::BadRequest("max_file_size must be greater than 0".to_string()));
        }
        let mut limits = self.limits.write().await;
        limits.max_file_size = max_file_size;
        info!("> Maximum file size set to {} bytes.", max_file_size);
        Ok(*limits)
    }

    pub async fn admit(&self, client: &str) -> IngestResult<()> {
        match self.limiter.admit(client).await {
            Admission::Allowed => Ok(()),
            Admission::Denied => {
                warn!("! Rate limit hit by {}.", client);
                Err(IngestError::RateLimited(client.to_string()))
            }
        }
    }

    pub async fn upload_whole<R>(
        &self,
        client: &str,
        declared_name: &str,
        mime_hint: Option<&str>,
        size_hint: Option<u64>,
        reader: R,
    ) -> IngestResult<StoredFile>
    where
        R: AsyncRead + Unpin,
    {
        self.admit(client).await?;
        self.store_stream(declared_name, mime_hint, size_hint, reader).await
    }

    /// Validates, reserves a unique name, and streams `reader` into it. No admission check.
    pub async fn store_stream<R>(
        &self,
        declared_name: &str,
        mime_hint: Option<&str>,
        size_hint: Option<u64>,
        mut reader: R,
    ) -> IngestResult<StoredFile>
    where
        R: AsyncRead + Unpin,
    {
        let name = sanitize(declared_name)
            .ok_or_else(|| Rejection::InvalidFilename(declared_name.to_string()))?;
        let validator = Validator::new(self.limits().await.max_file_size);
        validator.validate(&name, size_hint, mime_hint)?;

        tokio_fs::create_dir_all(&self.upload_dir).await?;
        let reservation = self.resolver.reserve(&self.upload_dir, &name).await?;
        let partial = PartialFile::new(reservation.path.clone());
        let mut file = reservation.file;
        let mut buf = vec![0u8; self.io_chunk_size];
        let mut written: u64 = 0;

        let copied = async {
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                written += n as u64;
                validator.check_size(written)?;
                file.write_all(&buf[..n]).await?;
            }
            file.flush().await?;
            file.sync_all().await.ok();
            Ok::<(), IngestError>(())
        }
        .await;
        drop(file);

        if let Err(e) = copied {
            warn!("! Saving '{}' failed: {}. Removing partial file.", reservation.name, e);
            return Err(e);
        }

        let stored = self
            .finish(
                &name,
                StoredFile {
                    final_name: reservation.name,
                    size: written,
                },
            )
            .await;
        partial.commit();
        info!("+ Stored '{}' as '{}' ({} bytes).", declared_name, stored.final_name, stored.size);
        Ok(stored)
    }

    async fn finish(&self, logical_name: &str, stored: StoredFile) -> StoredFile {
        let stored = self.normalizer.apply(stored).await;
        self.stats.record_origin(&stored.final_name, logical_name).await;
        self.stats.invalidate().await;
        stored
    }

    /// Stores every file independently; one failure never aborts its siblings. The caller
    /// has already admitted the request. Each file gets `batch_timeout` to finish; a file that
    /// runs over is aborted and its partial file removed.
    pub async fn store_batch(self: &Arc<Self>, files: Vec<IncomingFile>) -> BatchSummary {
        let timeout = self.batch_timeout;
        let pending = files.into_iter().map(|file| {
            let this = self.clone();
            let label = file.declared_name.clone();
            let handle = tokio::spawn(async move {
                let size = file.data.len() as u64;
                this.store_stream(
                    &file.declared_name,
                    file.mime_hint.as_deref(),
                    Some(size),
                    Cursor::new(file.data),
                )
                .await
            });
            async move {
                let mut handle = handle;
                match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(joined) => (label, false, joined),
                    Err(_) => {
                        handle.abort();
                        // A task that finished before the abort landed keeps its real outcome.
                        (label, true, handle.await)
                    }
                }
            }
        });

        let mut summary = BatchSummary::default();
        for (label, timed_out, outcome) in join_all(pending).await {
            match outcome {
                Ok(Ok(stored)) => summary.stored.push(stored),
                Ok(Err(e)) => summary.errors.push(format!("{}: {}", label, e)),
                Err(join_err) if timed_out && join_err.is_cancelled() => {
                    warn!("! '{}' did not finish within {:?}; aborted.", label, timeout);
                    summary
                        .errors
                        .push(format!("{}: timed out after {}s", label, timeout.as_secs()));
                }
                Err(join_err) => {
                    warn!("! Worker for '{}' did not finish: {}", label, join_err);
                    summary.errors.push(format!("{}: processing failed", label));
                }
            }
        }
        summary
    }

    /// Feeds one chunk to the assembler. The caller has already admitted the request.
    pub async fn store_chunk(&self, chunk: ChunkUpload<'_>) -> IngestResult<ChunkStatus> {
        let name = sanitize(chunk.declared_name)
            .ok_or_else(|| Rejection::InvalidFilename(chunk.declared_name.to_string()))?;
        let max_file_size = self.limits().await.max_file_size;

        // Validation applies to the logical upload, so it runs when a chunk set starts or restarts.
        let tracked_total = self.assembler.progress(&name).await.map(|(_, total)| total);
        if tracked_total != Some(chunk.total_chunks) {
            Validator::new(max_file_size).validate(&name, chunk.total_size, None)?;
        }

        tokio_fs::create_dir_all(&self.upload_dir).await?;
        let status = self
            .assembler
            .put_chunk(&name, chunk.index, chunk.total_chunks, chunk.bytes, max_file_size)
            .await?;

        match status {
            ChunkStatus::Complete(assembled) => {
                let stored = self.finish(&name, assembled.stored).await;
                Ok(ChunkStatus::Complete(Assembled {
                    stored,
                    ..assembled
                }))
            }
            accepted => Ok(accepted),
        }
    }
}
