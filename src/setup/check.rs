/* src/setup/check.rs */

use super::config::Config;
use regex::Regex;
use std::fs;
use std::path::Path;
use uuid::Uuid;

// Main validation entry point
pub fn validate_server_config(config: &Config) -> Result<(), String> {
    log::info!("> Performing server configuration checks...");

    validate_temp_dir_name(&config.storage.temp_dir)?;
    validate_limits(config)?;
    validate_upload_dir(&config.upload_dir())?;

    log::info!("+ Configuration checks passed successfully.");
    Ok(())
}

// temp_dir is a single path component below upload_dir
fn validate_temp_dir_name(name: &str) -> Result<(), String> {
    let re = Regex::new(r"^[a-zA-Z0-9_-]+$").map_err(|e| e.to_string())?;
    if !re.is_match(name) {
        return Err(format!(
            "Configuration error: temp_dir '{}' contains invalid characters. Only a-z, A-Z, 0-9, _, - are allowed.",
            name
        ));
    }
    Ok(())
}

fn validate_limits(config: &Config) -> Result<(), String> {
    if config.upload.io_chunk_size == 0 {
        return Err("Configuration error: upload.io_chunk_size must be greater than 0.".to_string());
    }
    if config.upload.max_file_size == 0 {
        return Err("Configuration error: upload.max_file_size must be greater than 0.".to_string());
    }
    if config.rate_limit.max_requests > 0 && config.rate_limit.window_secs == 0 {
        return Err(
            "Configuration error: rate_limit.window_secs must be greater than 0 when rate limiting is enabled."
                .to_string(),
        );
    }
    Ok(())
}

// upload_dir must exist (or be creatable) and be writable
fn validate_upload_dir(path: &Path) -> Result<(), String> {
    if path.exists() && !path.is_dir() {
        return Err(format!(
            "Configuration error: upload_dir '{}' exists but is not a directory.",
            path.display()
        ));
    }
    fs::create_dir_all(path).map_err(|e| {
        format!(
            "Configuration error: Failed to create upload_dir '{}': {}",
            path.display(),
            e
        )
    })?;

    // Attempt to write and delete a temporary file
    let temp_path = path.join(format!(".photodrop-write-check-{}.tmp", Uuid::new_v4()));

    if fs::write(&temp_path, "test").is_err() {
        return Err(format!(
            "Configuration error: No write permission for upload_dir '{}'.",
            path.display()
        ));
    }

    if fs::remove_file(&temp_path).is_err() {
        return Err(format!(
            "Configuration error: Failed to clean up temporary file in upload_dir '{}'. Check permissions.",
            path.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_missing_upload_dir() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("nested").join("uploads");
        let cfg = Config::for_upload_dir(target.to_string_lossy());

        validate_server_config(&cfg).unwrap();
        assert!(target.is_dir());
        assert_eq!(fs::read_dir(&target).unwrap().count(), 0);
    }

    #[test]
    fn rejects_upload_dir_that_is_a_file() {
        let root = TempDir::new().unwrap();
        let target = root.path().join("uploads");
        fs::write(&target, b"x").unwrap();
        let cfg = Config::for_upload_dir(target.to_string_lossy());

        let err = validate_server_config(&cfg).unwrap_err();
        assert!(err.contains("not a directory"));
    }

    #[test]
    fn rejects_nested_temp_dir_name() {
        let root = TempDir::new().unwrap();
        let mut cfg = Config::for_upload_dir(root.path().to_string_lossy());
        cfg.storage.temp_dir = "../escape".to_string();

        assert!(validate_server_config(&cfg).is_err());
    }

    #[test]
    fn rejects_zero_window_with_limiting_enabled() {
        let root = TempDir::new().unwrap();
        let mut cfg = Config::for_upload_dir(root.path().to_string_lossy());
        cfg.rate_limit.max_requests = 5;
        cfg.rate_limit.window_secs = 0;

        assert!(validate_server_config(&cfg).unwrap_err().contains("window_secs"));
    }
}
