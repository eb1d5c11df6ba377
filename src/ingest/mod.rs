/* src/ingest/mod.rs */

use serde::Serialize;
use std::io;
use thiserror::Error;

pub mod chunks;
pub mod coordinator;
pub mod limiter;
pub mod naming;
pub mod normalize;
pub mod reaper;
pub mod stats;
pub mod validate;

pub use validate::Rejection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
}

/// A file that now exists in the upload directory under `final_name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub final_name: String,
    pub size: u64,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0}")]
    Rejected(#[from] Rejection),
    #[error("Rate limit exceeded for {0}, retry later")]
    RateLimited(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
