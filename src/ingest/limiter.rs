/* src/ingest/limiter.rs */

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied,
}

/// Sliding-window admission control keyed by client identity.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        RateLimiter {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.max_requests > 0
    }

    pub async fn admit(&self, identity: &str) -> Admission {
        self.admit_at(identity, Instant::now()).await
    }

    pub async fn admit_at(&self, identity: &str, now: Instant) -> Admission {
        if !self.is_enabled() {
            return Admission::Allowed;
        }
        let mut windows = self.windows.lock().await;
        let stamps = windows.entry(identity.to_string()).or_default();
        prune(stamps, now, self.window);

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            Admission::Allowed
        } else {
            // Denied calls are not recorded, so a blocked client cannot extend its own block.
            Admission::Denied
        }
    }

    /// Evicts identities with no request inside the window. Returns how many were dropped.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, stamps| {
            prune(stamps, now, self.window);
            !stamps.is_empty()
        });
        before - windows.len()
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    pub async fn tracked_identities(&self) -> usize {
        self.windows.lock().await.len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&oldest) = stamps.front() {
        if now.saturating_duration_since(oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}
