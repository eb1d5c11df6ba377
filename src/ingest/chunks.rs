/* src/ingest/chunks.rs */

use super::naming::NameResolver;
use super::validate::Rejection;
use super::{IngestError, IngestResult, StoredFile};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Outcome of one `put_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkStatus {
    Accepted { index: u32, total: u32 },
    Complete(Assembled),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub logical_name: String,
    pub stored: StoredFile,
    /// Indices whose part file was absent when the final chunk triggered assembly.
    /// Their bytes are not in the stored file.
    pub missing: Vec<u32>,
}

#[derive(Debug)]
struct ChunkSet {
    total_chunks: u32,
    // index -> bytes of the latest part written for it
    received: BTreeMap<u32, u64>,
    last_activity: Instant,
}

impl ChunkSet {
    fn new(total_chunks: u32) -> Self {
        ChunkSet {
            total_chunks,
            received: BTreeMap::new(),
            last_activity: Instant::now(),
        }
    }

    fn received_bytes(&self) -> u64 {
        self.received.values().sum()
    }
}

pub fn part_file_name(logical_name: &str, index: u32) -> String {
    format!("{}.part{}", logical_name, index)
}

// `IMG_1.jpg.part3` -> `IMG_1.jpg`; also matches the in-flight `.partN.<uuid>.tmp` files.
fn owner_of_part(file_name: &str) -> Option<&str> {
    let (owner, rest) = file_name.rsplit_once(".part")?;
    let digits = rest.split('.').next()?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(owner)
}

/// Reassembles chunked uploads. Each logical filename owns one chunk set until the
/// chunk carrying the final index arrives.
pub struct ChunkAssembler {
    upload_dir: PathBuf,
    temp_dir: PathBuf,
    resolver: Arc<NameResolver>,
    sets: Mutex<HashMap<String, ChunkSet>>,
}

impl ChunkAssembler {
    pub fn new(upload_dir: PathBuf, temp_dir: PathBuf, resolver: Arc<NameResolver>) -> Self {
        ChunkAssembler {
            upload_dir,
            temp_dir,
            resolver,
            sets: Mutex::new(HashMap::new()),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub async fn is_tracking(&self, logical_name: &str) -> bool {
        self.sets.lock().await.contains_key(logical_name)
    }

    /// `(received, total)` for a logical upload still in progress.
    pub async fn progress(&self, logical_name: &str) -> Option<(usize, u32)> {
        self.sets
            .lock()
            .await
            .get(logical_name)
            .map(|set| (set.received.len(), set.total_chunks))
    }

    pub async fn pending_uploads(&self) -> usize {
        self.sets.lock().await.len()
    }

    pub async fn put_chunk(
        &self,
        logical_name: &str,
        index: u32,
        total_chunks: u32,
        bytes: &[u8],
        max_size: u64,
    ) -> IngestResult<ChunkStatus> {
        if total_chunks == 0 {
            return Err(IngestError::BadRequest("totalChunks must be at least 1".to_string()));
        }
        if index >= total_chunks {
            return Err(IngestError::BadRequest(format!(
                "chunkIndex {} is out of range for {} chunks",
                index, total_chunks
            )));
        }
        self.open_set(logical_name, total_chunks).await;
        let staging = self.stage_part(logical_name, index, bytes).await?;

        let detached = {
            let mut sets = self.sets.lock().await;
            let set = sets
                .entry(logical_name.to_string())
                .or_insert_with(|| ChunkSet::new(total_chunks));
            if set.total_chunks != total_chunks {
                // Another client restarted this name with a different chunk count meanwhile.
                drop(sets);
                let _ = tokio_fs::remove_file(&staging).await;
                return Err(IngestError::BadRequest(format!(
                    "upload of '{}' was restarted with a different chunk count",
                    logical_name
                )));
            }
            // Placed under the lock so a restart can never interleave with this part.
            self.commit_part(&staging, logical_name, index).await?;
            set.received.insert(index, bytes.len() as u64);
            set.last_activity = Instant::now();

            let received_bytes = set.received_bytes();
            if received_bytes > max_size {
                sets.remove(logical_name);
                drop(sets);
                warn!(
                    "! Chunked upload '{}' exceeded the size ceiling ({} > {}). Abandoning.",
                    logical_name, received_bytes, max_size
                );
                self.remove_parts(logical_name, total_chunks).await;
                return Err(Rejection::TooLarge {
                    size: received_bytes,
                    max: max_size,
                }
                .into());
            }

            debug!(
                "   - '{}': chunk {}/{} stored ({} of {} parts present).",
                logical_name,
                index + 1,
                total_chunks,
                set.received.len(),
                total_chunks
            );

            if index == total_chunks - 1 {
                sets.remove(logical_name)
            } else {
                None
            }
        };

        match detached {
            None => Ok(ChunkStatus::Accepted {
                index,
                total: total_chunks,
            }),
            Some(set) => {
                info!(
                    "> Final chunk for '{}' received. Assembling {} part(s)...",
                    logical_name, set.total_chunks
                );
                let assembled = self.assemble(logical_name, set.total_chunks).await?;
                Ok(ChunkStatus::Complete(assembled))
            }
        }
    }

    /// Makes sure a chunk set with `total_chunks` exists for `logical_name`. A set declared
    /// with a different count is stale: it is dropped together with its parts and replaced.
    async fn open_set(&self, logical_name: &str, total_chunks: u32) {
        let mut sets = self.sets.lock().await;
        match sets.get(logical_name) {
            Some(set) if set.total_chunks == total_chunks => {}
            Some(stale) => {
                let stale_total = stale.total_chunks;
                info!(
                    "> Restarting chunked upload '{}' ({} -> {} parts); dropping the earlier attempt.",
                    logical_name, stale_total, total_chunks
                );
                // Parts go while the lock is held so no chunk of the new set can be caught by it.
                self.remove_parts(logical_name, stale_total).await;
                sets.insert(logical_name.to_string(), ChunkSet::new(total_chunks));
            }
            None => {
                sets.insert(logical_name.to_string(), ChunkSet::new(total_chunks));
            }
        }
    }

    // Bytes land in a uuid-named staging file; it only becomes `{name}.part{index}` in `commit_part`.
    async fn stage_part(&self, logical_name: &str, index: u32, bytes: &[u8]) -> io::Result<PathBuf> {
        tokio_fs::create_dir_all(&self.temp_dir).await?;
        let staging = self.temp_dir.join(format!(
            "{}.{}.tmp",
            part_file_name(logical_name, index),
            Uuid::new_v4()
        ));
        if let Err(e) = tokio_fs::write(&staging, bytes).await {
            let _ = tokio_fs::remove_file(&staging).await;
            return Err(e);
        }
        Ok(staging)
    }

    // Rename replaces any earlier copy of the same index in one step.
    async fn commit_part(&self, staging: &Path, logical_name: &str, index: u32) -> io::Result<()> {
        let part_path = self.temp_dir.join(part_file_name(logical_name, index));
        if let Err(e) = tokio_fs::rename(staging, &part_path).await {
            let _ = tokio_fs::remove_file(staging).await;
            return Err(e);
        }
        Ok(())
    }

    async fn assemble(&self, logical_name: &str, total_chunks: u32) -> IngestResult<Assembled> {
        let reservation = self.resolver.reserve(&self.upload_dir, logical_name).await?;
        let final_name = reservation.name.clone();
        let final_path = reservation.path.clone();
        let file = reservation.file.into_std().await;
        let temp_dir = self.temp_dir.clone();
        let name = logical_name.to_string();

        let joined = tokio::task::spawn_blocking(move || {
            concatenate_parts_blocking(file, &temp_dir, &name, total_chunks)
        })
        .await
        .map_err(|e| io::Error::other(format!("assembly task failed: {}", e)))
        .and_then(|res| res);

        match joined {
            Ok((size, missing)) => {
                if missing.is_empty() {
                    info!("+ Assembled '{}' as '{}' ({} bytes).", logical_name, final_name, size);
                } else {
                    warn!(
                        "! Assembled '{}' as '{}' with {} missing part(s) {:?}; their bytes were skipped.",
                        logical_name,
                        final_name,
                        missing.len(),
                        missing
                    );
                }
                Ok(Assembled {
                    logical_name: logical_name.to_string(),
                    stored: StoredFile {
                        final_name,
                        size,
                    },
                    missing,
                })
            }
            Err(e) => {
                warn!("! Assembly of '{}' failed: {}. Cleaning up.", logical_name, e);
                let _ = tokio_fs::remove_file(&final_path).await;
                self.remove_parts(logical_name, total_chunks).await;
                Err(e.into())
            }
        }
    }

    async fn remove_parts(&self, logical_name: &str, total_chunks: u32) {
        for index in 0..total_chunks {
            let path = self.temp_dir.join(part_file_name(logical_name, index));
            let _ = tokio_fs::remove_file(path).await;
        }
    }

    /// Drops chunk sets idle for longer than `ttl` and deletes stale part files,
    /// including ones left behind by a previous process. Returns the number of sets dropped.
    pub async fn sweep(&self, ttl: Duration) -> usize {
        let stale: Vec<(String, u32)> = {
            let mut sets = self.sets.lock().await;
            let expired: Vec<String> = sets
                .iter()
                .filter(|(_, set)| set.last_activity.elapsed() > ttl)
                .map(|(name, _)| name.clone())
                .collect();
            expired
                .into_iter()
                .filter_map(|name| sets.remove(&name).map(|set| (name, set.total_chunks)))
                .collect()
        };

        for (name, total) in &stale {
            info!("> Abandoning idle chunked upload '{}' ({} parts expected).", name, total);
            self.remove_parts(name, *total).await;
        }

        let orphans = self.remove_orphan_parts(ttl).await;
        if orphans > 0 {
            info!("> Removed {} orphaned part file(s) from {}.", orphans, self.temp_dir.display());
        }
        stale.len()
    }

    async fn remove_orphan_parts(&self, ttl: Duration) -> usize {
        let mut entries = match tokio_fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(_) => return 0,
        };
        let live: Vec<String> = self.sets.lock().await.keys().cloned().collect();
        let mut removed = 0;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(owner) = owner_of_part(&file_name) else {
                continue;
            };
            if live.iter().any(|name| name == owner) {
                continue;
            }
            let age = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => SystemTime::now()
                    .duration_since(modified)
                    .unwrap_or_default(),
                Err(_) => continue,
            };
            if age > ttl && tokio_fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }
        removed
    }
}

/// Appends parts `0..total_chunks` to `dest` in index order, deleting each part once it
/// has been copied. Absent parts are skipped and returned. Runs on a blocking thread.
fn concatenate_parts_blocking(
    dest: fs::File,
    temp_dir: &Path,
    logical_name: &str,
    total_chunks: u32,
) -> io::Result<(u64, Vec<u32>)> {
    let mut writer = BufWriter::new(dest);
    let mut missing = Vec::new();
    let mut written: u64 = 0;

    for index in 0..total_chunks {
        let part_path = temp_dir.join(part_file_name(logical_name, index));
        let mut part = match fs::File::open(&part_path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                missing.push(index);
                continue;
            }
            Err(e) => return Err(e),
        };
        written += io::copy(&mut part, &mut writer)?;
        drop(part);
        fs::remove_file(&part_path).ok();
    }

    writer.flush()?;
    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all().ok();
    Ok((written, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MAX: u64 = 1024 * 1024;

    fn assembler(root: &TempDir) -> ChunkAssembler {
        let upload = root.path().to_path_buf();
        ChunkAssembler::new(upload.clone(), upload.join("temp"), Arc::new(NameResolver::new()))
    }

    #[test]
    fn owner_of_part_parses_committed_and_staging_names() {
        assert_eq!(owner_of_part("a.jpg.part0"), Some("a.jpg"));
        assert_eq!(owner_of_part("a.jpg.part12.5f2c.tmp"), Some("a.jpg"));
        assert_eq!(owner_of_part("a.jpg"), None);
        assert_eq!(owner_of_part("party.jpg"), None);
    }

    #[tokio::test]
    async fn intermediate_chunks_are_accepted_and_tracked() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);

        let status = asm.put_chunk("a.jpg", 0, 3, b"abc", MAX).await.unwrap();
        assert_eq!(status, ChunkStatus::Accepted { index: 0, total: 3 });
        assert_eq!(asm.progress("a.jpg").await, Some((1, 3)));
        assert!(root.path().join("temp").join("a.jpg.part0").exists());
    }

    #[tokio::test]
    async fn resubmitted_index_overwrites_in_place() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);

        asm.put_chunk("a.jpg", 0, 2, b"first", MAX).await.unwrap();
        asm.put_chunk("a.jpg", 0, 2, b"AB", MAX).await.unwrap();
        assert_eq!(asm.progress("a.jpg").await, Some((1, 2)));

        let status = asm.put_chunk("a.jpg", 1, 2, b"CD", MAX).await.unwrap();
        let ChunkStatus::Complete(done) = status else {
            panic!("expected assembly");
        };
        assert_eq!(fs::read(root.path().join("a.jpg")).unwrap(), b"ABCD");
        assert_eq!(done.stored.size, 4);
    }

    #[tokio::test]
    async fn out_of_range_index_and_zero_total_are_bad_requests() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);

        assert!(matches!(
            asm.put_chunk("a.jpg", 3, 3, b"x", MAX).await,
            Err(IngestError::BadRequest(_))
        ));
        assert!(matches!(
            asm.put_chunk("a.jpg", 0, 0, b"x", MAX).await,
            Err(IngestError::BadRequest(_))
        ));
        assert_eq!(asm.pending_uploads().await, 0);
    }

    #[tokio::test]
    async fn new_chunk_count_restarts_an_abandoned_set() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);
        let temp = root.path().join("temp");

        asm.put_chunk("IMG_0001.jpg", 0, 5, b"old-0", MAX).await.unwrap();
        asm.put_chunk("IMG_0001.jpg", 3, 5, b"old-3", MAX).await.unwrap();

        let status = asm.put_chunk("IMG_0001.jpg", 0, 2, b"new-", MAX).await.unwrap();
        assert_eq!(status, ChunkStatus::Accepted { index: 0, total: 2 });
        assert_eq!(asm.progress("IMG_0001.jpg").await, Some((1, 2)));
        assert!(!temp.join("IMG_0001.jpg.part3").exists());

        let status = asm.put_chunk("IMG_0001.jpg", 1, 2, b"photo", MAX).await.unwrap();
        let ChunkStatus::Complete(done) = status else {
            panic!("expected assembly");
        };
        assert!(done.missing.is_empty());
        assert_eq!(fs::read(root.path().join("IMG_0001.jpg")).unwrap(), b"new-photo");
    }

    #[tokio::test]
    async fn concurrent_first_chunks_leave_one_consistent_set() {
        let root = TempDir::new().unwrap();
        let asm = Arc::new(assembler(&root));

        let first = {
            let asm = asm.clone();
            tokio::spawn(async move { asm.put_chunk("race.mp4", 0, 5, b"five", MAX).await })
        };
        let second = {
            let asm = asm.clone();
            tokio::spawn(async move { asm.put_chunk("race.mp4", 0, 2, b"two", MAX).await })
        };
        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert!(first.is_ok() || second.is_ok());

        let (received, total) = asm.progress("race.mp4").await.unwrap();
        assert!(total == 5 || total == 2);
        assert_eq!(received, 1);
        let accepted = [(&first, 5u32), (&second, 2u32)]
            .iter()
            .any(|(res, t)| res.is_ok() && *t == total);
        assert!(accepted);
        assert!(root.path().join("temp").join("race.mp4.part0").exists());
    }

    #[tokio::test]
    async fn exceeding_ceiling_abandons_the_set() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);

        asm.put_chunk("a.jpg", 0, 3, &[1u8; 6], 10).await.unwrap();
        let err = asm.put_chunk("a.jpg", 1, 3, &[2u8; 6], 10).await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::Rejected(Rejection::TooLarge { size: 12, max: 10 })
        ));
        assert!(!asm.is_tracking("a.jpg").await);
        assert_eq!(fs::read_dir(root.path().join("temp")).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn sweep_drops_idle_sets_and_their_parts() {
        let root = TempDir::new().unwrap();
        let asm = assembler(&root);

        asm.put_chunk("idle.mov", 0, 4, b"zz", MAX).await.unwrap();
        assert_eq!(asm.sweep(Duration::from_secs(3600)).await, 0);
        assert!(asm.is_tracking("idle.mov").await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(asm.sweep(Duration::from_millis(1)).await, 1);
        assert!(!asm.is_tracking("idle.mov").await);
        assert!(!root.path().join("temp").join("idle.mov.part0").exists());
    }

    #[tokio::test]
    async fn sweep_removes_orphans_from_a_previous_run() {
        let root = TempDir::new().unwrap();
        let temp = root.path().join("temp");
        fs::create_dir_all(&temp).unwrap();
        fs::write(temp.join("old.jpg.part2"), b"leftover").unwrap();
        fs::write(temp.join("notes.txt"), b"not ours").unwrap();
        let asm = assembler(&root);

        tokio::time::sleep(Duration::from_millis(20)).await;
        asm.sweep(Duration::from_millis(1)).await;

        assert!(!temp.join("old.jpg.part2").exists());
        assert!(temp.join("notes.txt").exists());
    }
}
