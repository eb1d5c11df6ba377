/* src/ingest/validate.rs */

use super::MediaKind;
use mime_guess::mime::{self, Mime};
use thiserror::Error;

pub const PHOTO_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "heic", "heif", "webp", "tiff", "tif", "bmp", "gif", "raw", "dng",
];
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "3gp", "avi", "mkv", "webm", "hevc"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Invalid filename '{0}'")]
    InvalidFilename(String),
    #[error("File '{0}' has no extension; only photos and videos are accepted")]
    MissingExtension(String),
    #[error("Extension '.{0}' is not an accepted photo or video format")]
    UnsupportedExtension(String),
    #[error("File size {size} exceeds the maximum of {max} bytes")]
    TooLarge { size: u64, max: u64 },
    #[error("Content type '{0}' is not a photo or video")]
    MimeMismatch(String),
}

/// Lower-cased extension of `filename`, if it has a non-empty one.
pub fn extension_of(filename: &str) -> Option<String> {
    let (stem, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() || stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn media_kind(filename: &str) -> Option<MediaKind> {
    let ext = extension_of(filename)?;
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

/// Stateless acceptance check for one incoming file. Built per request from the
/// current size ceiling so a reconfiguration never changes a check mid-flight.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_file_size: u64,
}

impl Validator {
    pub fn new(max_file_size: u64) -> Self {
        Validator { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    pub fn validate(
        &self,
        filename: &str,
        declared_size: Option<u64>,
        mime_hint: Option<&str>,
    ) -> Result<MediaKind, Rejection> {
        let ext = extension_of(filename)
            .ok_or_else(|| Rejection::MissingExtension(filename.to_string()))?;
        let kind = media_kind(filename).ok_or(Rejection::UnsupportedExtension(ext))?;

        if let Some(size) = declared_size {
            self.check_size(size)?;
        }

        if let Some(hint) = mime_hint {
            check_mime_hint(hint)?;
        }

        Ok(kind)
    }

    pub fn check_size(&self, size: u64) -> Result<(), Rejection> {
        if size > self.max_file_size {
            return Err(Rejection::TooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }
}

// An unparseable or generic hint says nothing; only a known non-media type rejects.
fn check_mime_hint(hint: &str) -> Result<(), Rejection> {
    let hint = hint.trim();
    if hint.is_empty() {
        return Ok(());
    }
    let Ok(parsed) = hint.parse::<Mime>() else {
        return Ok(());
    };
    if parsed.essence_str() == mime::APPLICATION_OCTET_STREAM.essence_str() {
        return Ok(());
    }
    let top = parsed.type_();
    if top == mime::IMAGE || top == mime::VIDEO {
        Ok(())
    } else {
        Err(Rejection::MimeMismatch(parsed.essence_str().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 500 * 1024 * 1024;

    #[test]
    fn every_allowed_extension_is_accepted_in_any_case() {
        let v = Validator::new(MAX);
        for ext in PHOTO_EXTENSIONS {
            assert_eq!(v.validate(&format!("a.{}", ext), None, None), Ok(MediaKind::Photo));
            let upper = format!("IMG_0001.{}", ext.to_uppercase());
            assert_eq!(v.validate(&upper, None, None), Ok(MediaKind::Photo));
        }
        for ext in VIDEO_EXTENSIONS {
            assert_eq!(v.validate(&format!("clip.{}", ext), None, None), Ok(MediaKind::Video));
        }
    }

    #[test]
    fn other_extensions_are_rejected_citing_the_extension() {
        let v = Validator::new(MAX);
        for name in ["notes.txt", "setup.EXE", "archive.tar.gz", "doc.pdf"] {
            match v.validate(name, None, None) {
                Err(Rejection::UnsupportedExtension(ext)) => {
                    assert_eq!(ext, extension_of(name).unwrap());
                    let msg = Rejection::UnsupportedExtension(ext.clone()).to_string();
                    assert!(msg.contains(&ext));
                }
                other => panic!("{} -> {:?}", name, other),
            }
        }
    }

    #[test]
    fn names_without_extension_are_rejected() {
        let v = Validator::new(MAX);
        assert!(matches!(v.validate("photo", None, None), Err(Rejection::MissingExtension(_))));
        assert!(matches!(v.validate("photo.", None, None), Err(Rejection::MissingExtension(_))));
        assert!(matches!(v.validate(".jpg", None, None), Err(Rejection::MissingExtension(_))));
    }

    #[test]
    fn declared_size_over_ceiling_is_rejected() {
        let v = Validator::new(1000);
        assert!(v.validate("a.jpg", Some(1000), None).is_ok());
        assert_eq!(
            v.validate("a.jpg", Some(1001), None),
            Err(Rejection::TooLarge { size: 1001, max: 1000 })
        );
    }

    #[test]
    fn mime_hint_only_rejects_known_non_media_types() {
        let v = Validator::new(MAX);
        assert!(v.validate("a.heic", None, Some("image/heic")).is_ok());
        assert!(v.validate("a.mov", None, Some("video/quicktime")).is_ok());
        assert!(v.validate("a.jpg", None, Some("application/octet-stream")).is_ok());
        assert!(v.validate("a.jpg", None, Some("")).is_ok());
        assert!(v.validate("a.jpg", None, Some("not a mime")).is_ok());
        assert_eq!(
            v.validate("a.jpg", None, Some("text/html; charset=utf-8")),
            Err(Rejection::MimeMismatch("text/html".to_string()))
        );
    }
}
