/* src/ingest/normalize.rs */

use super::StoredFile;
use super::naming::NameResolver;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

const EXTENSION_ALIASES: &[(&str, &str)] = &[("jpeg", "jpg"), ("tif", "tiff"), ("heif", "heic")];

/// Canonical form of `name` when it differs: lower-case extension with aliases folded.
pub fn canonical_name(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    let lower = ext.to_ascii_lowercase();
    let canonical = EXTENSION_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lower)
        .map(|(_, target)| target.to_string())
        .unwrap_or(lower);
    if canonical == ext {
        None
    } else {
        Some(format!("{}.{}", stem, canonical))
    }
}

/// Post-store pass that rewrites a file's extension to its canonical form, going through
/// the name resolver so the rename can never clobber another file.
pub struct Normalizer {
    enabled: bool,
    upload_dir: PathBuf,
    resolver: Arc<NameResolver>,
}

impl Normalizer {
    pub fn new(enabled: bool, upload_dir: PathBuf, resolver: Arc<NameResolver>) -> Self {
        Normalizer {
            enabled,
            upload_dir,
            resolver,
        }
    }

    // Failures leave the stored file as it was; the upload itself already succeeded.
    pub async fn apply(&self, stored: StoredFile) -> StoredFile {
        if !self.enabled {
            return stored;
        }
        let Some(target) = canonical_name(&stored.final_name) else {
            return stored;
        };
        let source = self.upload_dir.join(&stored.final_name);
        match self.resolver.rename_into(&source, &self.upload_dir, &target).await {
            Ok(final_name) => {
                info!("   - Normalized '{}' to '{}'.", stored.final_name, final_name);
                StoredFile {
                    final_name,
                    size: stored.size,
                }
            }
            Err(e) => {
                warn!("! Could not normalize '{}': {}", stored.final_name, e);
                stored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn canonical_name_folds_aliases_and_case() {
        assert_eq!(canonical_name("a.JPEG").as_deref(), Some("a.jpg"));
        assert_eq!(canonical_name("a.jpeg").as_deref(), Some("a.jpg"));
        assert_eq!(canonical_name("scan.TIF").as_deref(), Some("scan.tiff"));
        assert_eq!(canonical_name("IMG.HEIC").as_deref(), Some("IMG.heic"));
        assert_eq!(canonical_name("clip.mov"), None);
        assert_eq!(canonical_name("noext"), None);
    }

    #[tokio::test]
    async fn disabled_normalizer_leaves_file_alone() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.JPEG"), b"x").unwrap();
        let n = Normalizer::new(false, dir.path().to_path_buf(), Arc::new(NameResolver::new()));

        let stored = StoredFile { final_name: "a.JPEG".into(), size: 1 };
        assert_eq!(n.apply(stored.clone()).await, stored);
        assert!(dir.path().join("a.JPEG").exists());
    }

    #[tokio::test]
    async fn enabled_normalizer_renames_without_overwriting() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.jpg"), b"existing").unwrap();
        fs::write(dir.path().join("a.JPEG"), b"fresh").unwrap();
        let n = Normalizer::new(true, dir.path().to_path_buf(), Arc::new(NameResolver::new()));

        let out = n
            .apply(StoredFile { final_name: "a.JPEG".into(), size: 5 })
            .await;

        assert_eq!(out.final_name, "a_1.jpg");
        assert!(!dir.path().join("a.JPEG").exists());
        assert_eq!(fs::read(dir.path().join("a.jpg")).unwrap(), b"existing");
        assert_eq!(fs::read(dir.path().join("a_1.jpg")).unwrap(), b"fresh");
    }
}
