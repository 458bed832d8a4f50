use std::path::Path;

use axum::http::{HeaderMap, header};
use bytes::Bytes;
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::ApiError;

/// 10 MB upload limit for images
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// URL prefix the media directory is served under.
pub const MEDIA_URL: &str = "/media/";

fn extension_for(headers: &HeaderMap) -> Option<&'static str> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    match content_type.split(';').next()?.trim() {
        "image/png" => Some("png"),
        "image/jpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        _ => None,
    }
}

/// Write an uploaded image under `media_dir/folder` and return its path
/// relative to `media_dir`.
pub async fn store_image(
    media_dir: &Path,
    folder: &str,
    headers: &HeaderMap,
    bytes: &Bytes,
) -> Result<String, ApiError> {
    if bytes.is_empty() {
        return Err(ApiError::Validation("No file was submitted.".into()));
    }
    if bytes.len() > MAX_UPLOAD_SIZE {
        return Err(ApiError::Validation("File is too large.".into()));
    }
    let ext = extension_for(headers).ok_or_else(|| {
        ApiError::Validation("Upload a valid image (png, jpeg, gif or webp).".into())
    })?;

    let dir = media_dir.join(folder);
    tokio::fs::create_dir_all(&dir).await.map_err(|e| {
        error!("Failed to create media directory {}: {}", dir.display(), e);
        ApiError::internal(e)
    })?;

    let relative = format!("{}/{}.{}", folder, Uuid::new_v4(), ext);
    let file_path = media_dir.join(&relative);
    tokio::fs::write(&file_path, bytes).await.map_err(|e| {
        error!("Failed to write file {}: {}", file_path.display(), e);
        ApiError::internal(e)
    })?;

    Ok(relative)
}

/// Best effort: a file that is already gone is not an error.
pub async fn remove_file(media_dir: &Path, relative: &str) {
    if relative.is_empty() {
        return;
    }
    let path = media_dir.join(relative);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove media file {}: {}", path.display(), e);
        }
    }
}

pub fn media_url(relative: &str) -> String {
    if relative.is_empty() {
        String::new()
    } else {
        format!("{}{}", MEDIA_URL, relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(content_type: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
        h
    }

    #[test]
    fn content_type_picks_extension() {
        assert_eq!(extension_for(&headers("image/png")), Some("png"));
        assert_eq!(extension_for(&headers("image/jpeg; charset=binary")), Some("jpg"));
        assert_eq!(extension_for(&headers("text/plain")), None);
        assert_eq!(extension_for(&HeaderMap::new()), None);
    }

    #[test]
    fn media_urls() {
        assert_eq!(media_url(""), "");
        assert_eq!(media_url("category/images/a.png"), "/media/category/images/a.png");
    }

    #[tokio::test]
    async fn stores_and_removes_images() {
        let dir = std::env::temp_dir().join(format!("bazaar-media-{}", Uuid::new_v4()));
        let relative = store_image(&dir, "product/images", &headers("image/png"), &Bytes::from_static(b"\x89PNG"))
            .await
            .unwrap();
        assert!(relative.starts_with("product/images/"));
        assert!(dir.join(&relative).exists());

        remove_file(&dir, &relative).await;
        assert!(!dir.join(&relative).exists());
        remove_file(&dir, &relative).await;

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn empty_uploads_are_rejected() {
        let dir = std::env::temp_dir();
        let err = store_image(&dir, "x", &headers("image/png"), &Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }
}
