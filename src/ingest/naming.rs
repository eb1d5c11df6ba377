/* src/ingest/naming.rs */

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::fs as tokio_fs;
use tokio::sync::Mutex;

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static whitespace pattern"));
static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("static filename pattern"));

/// Reduces a client-supplied name to a portable basename. `None` when nothing usable is left.
pub fn sanitize(raw: &str) -> Option<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .find(|part| !part.trim().is_empty())?;
    let visible: String = base.chars().filter(|c| !c.is_control()).collect();
    let joined = WHITESPACE.replace_all(visible.trim(), "_");
    let safe = UNSAFE_CHARS.replace_all(&joined, "");
    let trimmed = safe.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => (stem, &name[stem.len()..]),
        _ => (name, ""),
    }
}

/// First of `name`, `stem_1.ext`, `stem_2.ext`, ... that is absent from `taken`.
pub fn resolve(name: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(name) {
        return name.to_string();
    }
    let (stem, ext) = split_name(name);
    let mut counter: u64 = 1;
    loop {
        let candidate = format!("{}_{}{}", stem, counter, ext);
        if !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

pub async fn snapshot(dir: &Path) -> io::Result<HashSet<String>> {
    let mut names = HashSet::new();
    let mut entries = tokio_fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        names.insert(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

/// A freshly created, empty file that nobody else can claim.
#[derive(Debug)]
pub struct Reservation {
    pub name: String,
    pub path: PathBuf,
    pub file: tokio_fs::File,
}

/// Serializes "pick a free name, then create it" per target directory.
#[derive(Default)]
pub struct NameResolver {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl NameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, dir: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(dir.to_path_buf()).or_default().clone()
    }

    pub async fn reserve(&self, dir: &Path, desired: &str) -> io::Result<Reservation> {
        let dir_lock = self.lock_for(dir).await;
        let _guard = dir_lock.lock().await;

        let mut taken = snapshot(dir).await?;
        loop {
            let name = resolve(desired, &taken);
            let path = dir.join(&name);
            match tokio_fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    log::debug!("   - Reserved '{}' for '{}'.", name, desired);
                    return Ok(Reservation { name, path, file });
                }
                // Someone outside this process created it between snapshot and open.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    taken.insert(name);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Moves `source` into `dir` under a collision-free variant of `desired`.
    pub async fn rename_into(&self, source: &Path, dir: &Path, desired: &str) -> io::Result<String> {
        let reservation = self.reserve(dir, desired).await?;
        drop(reservation.file);
        if let Err(e) = tokio_fs::rename(source, &reservation.path).await {
            let _ = tokio_fs::remove_file(&reservation.path).await;
            return Err(e);
        }
        Ok(reservation.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn resolve_skips_existing_counters() {
        let taken = set(&["photo.jpg", "photo_1.jpg"]);
        assert_eq!(resolve("photo.jpg", &taken), "photo_2.jpg");
        assert_eq!(resolve("other.jpg", &taken), "other.jpg");
    }

    #[test]
    fn resolve_without_extension_appends_counter() {
        let taken = set(&["README"]);
        assert_eq!(resolve("README", &taken), "README_1");
    }

    #[test]
    fn resolve_only_splits_on_last_dot() {
        let taken = set(&["a.b.png"]);
        assert_eq!(resolve("a.b.png", &taken), "a.b_1.png");
    }

    #[test]
    fn sanitize_strips_paths_and_unsafe_characters() {
        assert_eq!(sanitize("../../etc/passwd").as_deref(), Some("passwd"));
        assert_eq!(sanitize("C:\\Users\\me\\IMG 0001.HEIC").as_deref(), Some("IMG_0001.HEIC"));
        assert_eq!(sanitize("My Photo (1).jpg").as_deref(), Some("My_Photo_1.jpg"));
        assert_eq!(sanitize("bad\u{0}\u{7}name.png").as_deref(), Some("badname.png"));
        assert_eq!(sanitize(".hidden.jpg").as_deref(), Some("hidden.jpg"));
        assert_eq!(sanitize("trailing/").as_deref(), Some("trailing"));
    }

    #[test]
    fn sanitize_rejects_names_with_nothing_left() {
        assert_eq!(sanitize(""), None);
        assert_eq!(sanitize(".."), None);
        assert_eq!(sanitize("/"), None);
        assert_eq!(sanitize("日本語"), None);
    }

    #[tokio::test]
    async fn reserve_never_hands_out_the_same_name_twice() {
        let dir = TempDir::new().unwrap();
        let resolver = Arc::new(NameResolver::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let path = dir.path().to_path_buf();
            handles.push(tokio::spawn(async move {
                resolver.reserve(&path, "photo.jpg").await.unwrap().name
            }));
        }
        let mut names = HashSet::new();
        for handle in handles {
            assert!(names.insert(handle.await.unwrap()));
        }
        assert_eq!(names.len(), 8);
        assert!(names.contains("photo.jpg"));
        assert!(names.contains("photo_7.jpg"));
    }

    #[tokio::test]
    async fn rename_into_resolves_against_existing_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("shot.jpg"), b"old").unwrap();
        let source = dir.path().join("shot.JPEG");
        std::fs::write(&source, b"new").unwrap();

        let name = NameResolver::new()
            .rename_into(&source, dir.path(), "shot.jpg")
            .await
            .unwrap();

        assert_eq!(name, "shot_1.jpg");
        assert!(!source.exists());
        assert_eq!(std::fs::read(dir.path().join("shot.jpg")).unwrap(), b"old");
        assert_eq!(std::fs::read(dir.path().join("shot_1.jpg")).unwrap(), b"new");
    }
}
