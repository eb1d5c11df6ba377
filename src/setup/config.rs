/* src/setup/config.rs */

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8730;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 500 * 1024 * 1024;
pub const DEFAULT_IO_CHUNK_SIZE: usize = 8192 * 4;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SetupConfig {
    pub log_level: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct NetworkConfig {
    pub listen: String,
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub temp_dir: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct UploadConfig {
    pub max_file_size: u64,
    pub io_chunk_size: usize,
    pub batch_timeout_secs: u64,
    pub metadata_timeout_ms: u64,
    pub normalize_extensions: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct RateLimitConfig {
    // 0 disables admission control entirely.
    pub max_requests: usize,
    pub window_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct SweepConfig {
    pub interval_secs: u64,
    pub chunk_ttl_secs: u64,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub setup: SetupConfig,
    pub network: NetworkConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            upload_dir: "uploads".to_string(),
            temp_dir: "temp".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            io_chunk_size: DEFAULT_IO_CHUNK_SIZE,
            batch_timeout_secs: 10,
            metadata_timeout_ms: 2000,
            normalize_extensions: false,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 600,
            window_secs: 60,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            interval_secs: 300,
            chunk_ttl_secs: 3600,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// A config suitable for running against an arbitrary upload directory, used by tests
    /// and by embedding callers that do not read a file.
    pub fn for_upload_dir(upload_dir: impl Into<String>) -> Self {
        Config {
            setup: SetupConfig {
                log_level: "info".to_string(),
            },
            network: NetworkConfig {
                listen: "127.0.0.1".to_string(),
                address: "127.0.0.1".to_string(),
                port: DEFAULT_PORT,
            },
            storage: StorageConfig {
                upload_dir: upload_dir.into(),
                ..StorageConfig::default()
            },
            upload: UploadConfig::default(),
            rate_limit: RateLimitConfig::default(),
            sweep: SweepConfig::default(),
        }
    }

    pub fn upload_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.upload_dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.upload_dir().join(&self.storage.temp_dir)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.batch_timeout_secs)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_millis(self.upload.metadata_timeout_ms)
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit.window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs.max(1))
    }

    pub fn chunk_ttl(&self) -> Duration {
        Duration::from_secs(self.sweep.chunk_ttl_secs)
    }
}
