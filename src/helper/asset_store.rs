use crate::models::db_operations::users_db_operations;
use actix_multipart::Multipart;
use actix_web::web::BytesMut;
use futures_util::StreamExt;
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Upload error: {0}")]
    Multipart(String),
    #[error("Unsupported file type: '{0}'. Please upload one of the allowed types.")]
    UnsupportedType(String),
    #[error("File is too large. Maximum size is {0}MB.")]
    TooLarge(u64),
    #[error("File uploads are currently disabled. No MIME types are configured.")]
    UploadsDisabled,
    #[error("Invalid form field: {0}")]
    InvalidField(String),
    #[error("Refusing to touch asset path '{0}'.")]
    InvalidPath(String),
}

/// Where an uploaded asset ended up. `path` is what gets persisted and later
/// handed back to `remove`; `url` is how clients fetch it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredAsset {
    pub path: String,
    pub url: String,
}

pub trait AssetStore: Send + Sync {
    fn upload(&self, bucket: &str, bytes: &[u8], ext: &str) -> Result<StoredAsset, AssetError>;
    fn remove(&self, path: &str) -> Result<(), AssetError>;
    fn url_for(&self, path: &str) -> String;
}

/// Writes assets below `MEDIA_PATH` as `<bucket>/xx/yy/<uuid>.<ext>`.
pub struct LocalAssetStore {
    root: PathBuf,
    url_prefix: String,
}

impl LocalAssetStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        LocalAssetStore { root: root.into(), url_prefix: url_prefix.trim_end_matches('/').to_string() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, AssetError> {
        let relative = Path::new(path);
        let is_plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !is_plain {
            return Err(AssetError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl AssetStore for LocalAssetStore {
    fn upload(&self, bucket: &str, bytes: &[u8], ext: &str) -> Result<StoredAsset, AssetError> {
        let file_id = Uuid::new_v4().to_string();
        let path = format!("{}/{}/{}/{}.{}", bucket, &file_id[0..2], &file_id[2..4], file_id, ext);
        let full_path = self.resolve(&path)?;
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&full_path, bytes)?;
        log::info!("Stored asset {} ({} bytes)", path, bytes.len());
        Ok(StoredAsset { url: self.url_for(&path), path })
    }

    fn remove(&self, path: &str) -> Result<(), AssetError> {
        let full_path = self.resolve(path)?;
        fs::remove_file(full_path)?;
        Ok(())
    }

    fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.url_prefix, path)
    }
}

/// Maps a validated MIME type to the extension assets are stored with.
/// Not configurable: an allowed type without a mapping is refused.
pub fn mime_to_safe_extension(mime_type: &str) -> Option<&'static str> {
    let map: BTreeMap<&str, &str> = [
        ("application/msword", "doc"),
        ("application/pdf", "pdf"),
        ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", "docx"),
        ("image/gif", "gif"),
        ("image/jpeg", "jpg"),
        ("image/png", "png"),
        ("image/webp", "webp"),
    ]
    .iter()
    .cloned()
    .collect();

    map.get(mime_type).cloned()
}

#[derive(Debug, Clone)]
pub struct UploadLimits {
    pub max_file_size_mb: u64,
    pub allowed_mime_types: HashSet<String>,
}

impl UploadLimits {
    pub fn from_settings(conn: &Connection) -> UploadLimits {
        let max_file_size_mb = users_db_operations::read_setting(conn, "max_file_upload_size_mb")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(5);
        let allowed_mime_types = users_db_operations::read_setting(conn, "allowed_mime_types")
            .unwrap_or_default()
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        UploadLimits { max_file_size_mb, allowed_mime_types }
    }

    fn max_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }

    /// Validates `content_type` for a `kind` field and returns the extension
    /// to store it under.
    pub fn extension_for(&self, content_type: &str, kind: FileKind) -> Result<&'static str, AssetError> {
        if self.allowed_mime_types.is_empty() {
            return Err(AssetError::UploadsDisabled);
        }
        if !self.allowed_mime_types.contains(content_type) || !kind.accepts(content_type) {
            return Err(AssetError::UnsupportedType(content_type.to_string()));
        }
        mime_to_safe_extension(content_type).ok_or_else(|| {
            log::error!("Allowed MIME type '{}' has no safe extension mapping.", content_type);
            AssetError::UnsupportedType(content_type.to_string())
        })
    }
}

/// What a file field may hold, on top of the site-wide allowlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Thumbnails and gallery photos.
    Image,
    /// Letter templates.
    Document,
}

impl FileKind {
    pub fn accepts(self, content_type: &str) -> bool {
        match self {
            FileKind::Image => content_type.starts_with("image/"),
            FileKind::Document => content_type.starts_with("application/"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub bytes: Vec<u8>,
    pub ext: &'static str,
    pub content_type: String,
    pub original_filename: String,
}

/// A multipart body split into its text fields and at most one file.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub fields: HashMap<String, String>,
    pub file: Option<UploadedFile>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

const MAX_TEXT_FIELD_BYTES: usize = 256 * 1024;
const MAX_TEXT_TOTAL_BYTES: usize = 1024 * 1024;
const MAX_TEXT_FIELDS: usize = 32;

/// Reads the whole multipart body. The part named `file_field` is checked
/// against `limits` and `kind`, then buffered; every other part is read as
/// UTF-8 text.
pub async fn read_upload_form(
    mut payload: Multipart,
    file_field: &str,
    kind: FileKind,
    limits: &UploadLimits,
) -> Result<UploadForm, AssetError> {
    let mut form = UploadForm::default();
    let mut text_parts = 0usize;
    let mut text_bytes = 0usize;

    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| AssetError::Multipart(e.to_string()))?;
        let field_name = field.content_disposition().get_name().unwrap_or_default().to_string();

        if field_name == file_field {
            if form.file.is_some() {
                return Err(AssetError::InvalidField(format!("Only one '{}' file may be uploaded.", file_field)));
            }
            let original_filename = field.content_disposition().get_filename().unwrap_or("upload.tmp").to_string();
            let content_type = field
                .content_type()
                .map(|m| m.essence_str().to_string())
                .ok_or_else(|| AssetError::Multipart("Content-Type not available.".to_string()))?;
            let ext = limits.extension_for(&content_type, kind)?;

            let mut data = BytesMut::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| AssetError::Multipart(e.to_string()))?;
                if (data.len() + chunk.len()) as u64 > limits.max_bytes() {
                    return Err(AssetError::TooLarge(limits.max_file_size_mb));
                }
                data.extend_from_slice(&chunk);
            }
            // An empty file input still arrives as a part.
            if data.is_empty() {
                continue;
            }
            form.file = Some(UploadedFile { bytes: data.to_vec(), ext, content_type, original_filename });
        } else {
            text_parts += 1;
            if text_parts > MAX_TEXT_FIELDS {
                return Err(AssetError::InvalidField(format!("Too many form fields (at most {}).", MAX_TEXT_FIELDS)));
            }
            let mut data = BytesMut::new();
            while let Some(chunk) = field.next().await {
                let chunk = chunk.map_err(|e| AssetError::Multipart(e.to_string()))?;
                if data.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
                    return Err(AssetError::InvalidField(format!("'{}' is too long.", field_name)));
                }
                text_bytes += chunk.len();
                if text_bytes > MAX_TEXT_TOTAL_BYTES {
                    return Err(AssetError::InvalidField("Form fields are too large in total.".to_string()));
                }
                data.extend_from_slice(&chunk);
            }
            let value = String::from_utf8(data.to_vec())
                .map_err(|_| AssetError::InvalidField(format!("Invalid UTF-8 in '{}'.", field_name)))?;
            form.fields.insert(field_name, value);
        }
    }
    Ok(form)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(types: &[&str]) -> UploadLimits {
        UploadLimits { max_file_size_mb: 1, allowed_mime_types: types.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn local_store_writes_and_removes_sharded_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalAssetStore::new(dir.path(), "/media/");
        let asset = store.upload("news", b"jpeg-bytes", "jpg").unwrap();

        assert!(asset.path.starts_with("news/"));
        assert!(asset.path.ends_with(".jpg"));
        assert_eq!(asset.url, format!("/media/{}", asset.path));
        assert_eq!(fs::read(dir.path().join(&asset.path)).unwrap(), b"jpeg-bytes");

        store.remove(&asset.path).unwrap();
        assert!(!dir.path().join(&asset.path).exists());
        assert!(store.remove(&asset.path).is_err());
    }

    #[test]
    fn local_store_rejects_escaping_paths() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = LocalAssetStore::new(dir.path(), "/media");
        assert!(matches!(store.remove("../etc/passwd"), Err(AssetError::InvalidPath(_))));
        assert!(matches!(store.remove("/etc/passwd"), Err(AssetError::InvalidPath(_))));
        assert!(matches!(store.remove(""), Err(AssetError::InvalidPath(_))));
    }

    #[test]
    fn mime_checks_follow_settings_and_safe_map() {
        let l = limits(&["image/png", "application/zip"]);
        assert_eq!(l.extension_for("image/png", FileKind::Image).unwrap(), "png");
        assert!(matches!(l.extension_for("image/jpeg", FileKind::Image), Err(AssetError::UnsupportedType(_))));
        // Allowed by settings but never mapped to an extension.
        assert!(matches!(l.extension_for("application/zip", FileKind::Document), Err(AssetError::UnsupportedType(_))));
        assert!(matches!(limits(&[]).extension_for("image/png", FileKind::Image), Err(AssetError::UploadsDisabled)));
    }

    #[test]
    fn file_kind_narrows_the_allowlist() {
        let l = limits(&["image/png", "application/pdf"]);
        assert!(matches!(l.extension_for("application/pdf", FileKind::Image), Err(AssetError::UnsupportedType(_))));
        assert!(matches!(l.extension_for("image/png", FileKind::Document), Err(AssetError::UnsupportedType(_))));
        assert_eq!(l.extension_for("application/pdf", FileKind::Document).unwrap(), "pdf");
    }
}
