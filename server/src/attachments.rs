use std::{path::PathBuf, sync::OnceLock};

use chrono::Utc;
use regex::Regex;
use uuid::Uuid;

use crate::{
    error::ChatError,
    types::{Attachment, MediaKind},
};

pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
pub const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png", "gif", "mp4", "mov", "avi"];
pub const PUBLIC_PREFIX: &str = "/attachments";

const FALLBACK_STEM: &str = "attachment";

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_-]+").expect("literal pattern compiles"))
}

fn is_safe_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

pub fn file_extension(file_name: &str) -> Option<String> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn media_kind_for_extension(ext: &str) -> MediaKind {
    match ext {
        "pdf" => MediaKind::Pdf,
        "mp4" | "mov" | "avi" => MediaKind::Video,
        _ => MediaKind::Image,
    }
}

/// Checks type and size without touching disk.
pub fn validate(file_name: &str, size_bytes: u64) -> Result<MediaKind, ChatError> {
    if size_bytes == 0 {
        return Err(ChatError::invalid("No file uploaded"));
    }
    let ext = file_extension(file_name)
        .filter(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
        .ok_or_else(|| ChatError::invalid("Invalid file type. Allowed: PDF, images, videos"))?;
    if size_bytes > MAX_ATTACHMENT_BYTES {
        return Err(ChatError::invalid("File size exceeds 10MB limit"));
    }
    Ok(media_kind_for_extension(&ext))
}

/// Reduces an uploaded name to something safe to embed in a stored file
/// name. Path components are dropped. The stem and the extension are
/// cleaned separately so the extension always survives.
pub fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(|c: char| c == '/' || c == '\\')
        .next()
        .unwrap_or(file_name);
    let (stem, ext) = match base.rsplit_once('.') {
        Some((stem, ext)) => (stem, Some(ext.to_ascii_lowercase())),
        None => (base, None),
    };

    let stem = unsafe_chars().replace_all(stem, "_");
    let stem = stem.trim_matches('_');
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

    let ext = ext
        .map(|ext| unsafe_chars().replace_all(&ext, "").into_owned())
        .filter(|ext| !ext.is_empty());
    match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// Names produced by [`AttachmentStore::store`] never contain separators
/// or leading dots.
pub fn is_safe_stored_name(value: &str) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && !value.contains("..")
        && value.chars().all(is_safe_char)
}

pub fn content_type_for(file_name: &str) -> &'static str {
    match file_extension(file_name).as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("mp4") => "video/mp4",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}

/// Local-directory content store for chat uploads. Files are not grouped
/// per session; the random prefix keeps names unique.
pub struct AttachmentStore {
    root: PathBuf,
}

impl AttachmentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub async fn ensure_root(&self) -> Result<(), ChatError> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(())
    }

    pub async fn store(
        &self,
        session_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<Attachment, ChatError> {
        let media_kind = validate(file_name, bytes.len() as u64)?;

        let stored_name = format!("{}_{}", Uuid::new_v4(), sanitize_file_name(file_name));
        self.ensure_root().await?;
        tokio::fs::write(self.root.join(&stored_name), bytes).await?;

        tracing::info!(
            session_id,
            file = %stored_name,
            size = bytes.len(),
            "stored chat attachment"
        );

        Ok(Attachment {
            original_file_name: file_name.to_string(),
            media_kind,
            size_bytes: bytes.len() as u64,
            storage_path: format!("{PUBLIC_PREFIX}/{stored_name}"),
            uploaded_at: Utc::now(),
        })
    }

    pub async fn read(&self, stored_name: &str) -> Result<Vec<u8>, ChatError> {
        if !is_safe_stored_name(stored_name) {
            return Err(ChatError::not_found("attachment not found"));
        }
        match tokio::fs::read(self.root.join(stored_name)).await {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(ChatError::not_found("attachment not found"))
            }
            Err(err) => Err(err.into()),
        }
    }
}
