/* src/ingest/reaper.rs */

use super::coordinator::UploadCoordinator;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub identities: usize,
    pub chunk_sets: usize,
}

pub async fn sweep_once(coordinator: &UploadCoordinator, chunk_ttl: Duration) -> SweepReport {
    SweepReport {
        identities: coordinator.limiter().sweep().await,
        chunk_sets: coordinator.assembler().sweep(chunk_ttl).await,
    }
}

// Periodic eviction of idle rate windows and abandoned chunk sets.
pub fn spawn_reaper(
    coordinator: Arc<UploadCoordinator>,
    interval: Duration,
    chunk_ttl: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "> Reaper started (every {:?}, chunk TTL {:?}).",
            interval, chunk_ttl
        );
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = sweep_once(&coordinator, chunk_ttl).await;
            if report != SweepReport::default() {
                info!(
                    "> Reaper evicted {} idle client window(s) and {} abandoned upload(s).",
                    report.identities, report.chunk_sets
                );
            } else {
                debug!("   - Reaper pass found nothing to evict.");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::coordinator::ChunkUpload;
    use crate::setup::config::Config;
    use tempfile::TempDir;

    #[tokio::test]
    async fn sweep_clears_abandoned_uploads_and_quiet_clients() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::for_upload_dir(dir.path().to_string_lossy());
        cfg.rate_limit.window_secs = 1;
        let coordinator = UploadCoordinator::from_config(&cfg);

        coordinator.admit("192.168.1.9").await.unwrap();
        coordinator
            .store_chunk(ChunkUpload {
                declared_name: "clip.mp4",
                index: 0,
                total_chunks: 3,
                total_size: Some(30),
                bytes: &[0u8; 10],
            })
            .await
            .unwrap();

        let report = sweep_once(&coordinator, Duration::from_secs(3600)).await;
        assert_eq!(report, SweepReport::default());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let report = sweep_once(&coordinator, Duration::from_millis(1)).await;
        assert_eq!(report, SweepReport { identities: 1, chunk_sets: 1 });
        assert_eq!(coordinator.assembler().pending_uploads().await, 0);
    }
}
