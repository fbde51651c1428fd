// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Uploaded image storage.
//!
//! Bytes are written under `<root>/images/` and addressed by
//! `<url_prefix>images/<name>`. Nothing is decoded or resized; the upload
//! only has to look like one of the common image containers.

use crate::config::MediaConfig;
use crate::error::{ApiError, Result};
use crate::input::Upload;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};

const IMAGE_DIR: &str = "images";
const DEFAULT_PREFIX: &str = "/media/";

/// Leading bytes of the accepted image containers.
const SIGNATURES: &[&[u8]] = &[
    b"\x89PNG\r\n\x1a\n",
    b"\xff\xd8\xff",
    b"GIF87a",
    b"GIF89a",
    b"BM",
];

/// Filesystem-backed image store.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    url_prefix: String,
}

impl MediaStore {
    /// A blank or root prefix falls back to `/media/`, so stored URLs and
    /// the served route always agree.
    pub fn new(config: &MediaConfig) -> Self {
        let trimmed = config.url_prefix.trim().trim_end_matches('/');
        let url_prefix = if trimmed.trim_start_matches('/').is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            format!("{trimmed}/")
        };
        Self {
            root: config.root.clone(),
            url_prefix,
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Route the media root is served under, without the trailing slash.
    pub fn mount_path(&self) -> &str {
        self.url_prefix.trim_end_matches('/')
    }

    /// Persist an uploaded image and return its relative URL.
    ///
    /// A name already in use gets a short random suffix; existing files are
    /// never overwritten.
    pub async fn save_image(&self, upload: &Upload) -> Result<String> {
        check_image(upload)?;

        let dir = self.root.join(IMAGE_DIR);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            error!(path = %dir.display(), error = %e, "Cannot create media directory");
            ApiError::StoreUnavailable(format!("media directory: {e}"))
        })?;

        let (stem, extension) = split_name(&sanitize_filename(&upload.filename));
        let mut name = format!("{stem}{extension}");

        for _ in 0..8 {
            let path = dir.join(&name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&upload.bytes).await.map_err(|e| {
                        ApiError::StoreUnavailable(format!("media write: {e}"))
                    })?;
                    file.flush()
                        .await
                        .map_err(|e| ApiError::StoreUnavailable(format!("media write: {e}")))?;

                    let url = format!("{}{IMAGE_DIR}/{name}", self.url_prefix);
                    info!(%url, size = upload.bytes.len(), "Stored image");
                    return Ok(url);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    let suffix = uuid::Uuid::new_v4().simple().to_string();
                    name = format!("{stem}_{}{extension}", &suffix[..7]);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Cannot store image");
                    return Err(ApiError::StoreUnavailable(format!("media write: {e}")));
                }
            }
        }

        Err(ApiError::StoreUnavailable(
            "could not find a free media file name".to_string(),
        ))
    }

    /// Delete an image previously returned by [`save_image`](Self::save_image).
    ///
    /// Only names directly under the image directory are touched. Failures
    /// are logged and otherwise ignored.
    pub async fn discard(&self, url: &str) {
        let name = url
            .strip_prefix(self.url_prefix.as_str())
            .and_then(|rest| rest.strip_prefix(IMAGE_DIR))
            .and_then(|rest| rest.strip_prefix('/'));
        let Some(name) = name.filter(|name| {
            !name.is_empty() && !name.starts_with('.') && !name.contains(['/', '\\'])
        }) else {
            warn!(%url, "Not a stored image URL, nothing discarded");
            return;
        };

        let path = self.root.join(IMAGE_DIR).join(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!(%url, "Discarded image"),
            Err(e) => warn!(path = %path.display(), error = %e, "Cannot discard image"),
        }
    }
}

fn check_image(upload: &Upload) -> Result<()> {
    if upload.bytes.is_empty() {
        return Err(ApiError::invalid("image", "The submitted file is empty."));
    }
    let riff_webp = upload.bytes.len() >= 12
        && &upload.bytes[..4] == b"RIFF"
        && &upload.bytes[8..12] == b"WEBP";
    if riff_webp || SIGNATURES.iter().any(|sig| upload.bytes.starts_with(sig)) {
        Ok(())
    } else {
        Err(ApiError::invalid(
            "image",
            "Upload a valid image. The file you uploaded was either not an image or a corrupted image.",
        ))
    }
}

/// Keep only the final path component and a conservative character set.
fn sanitize_filename(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

fn split_name(name: &str) -> (String, String) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_ascii_lowercase()),
        _ => (name.to_string(), String::new()),
    }
}
