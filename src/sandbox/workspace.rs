//! Host-side view of a sandbox workspace
//!
//! The sandbox sees its files under `/workspace`; on the host they live in a
//! per-conversation directory. Every path goes through two checks:
//! 1. lexical confinement ([`validate_file_path`]) on the in-sandbox path
//! 2. symlink confinement: the deepest existing ancestor must canonicalize
//!    to somewhere inside the workspace directory

use std::path::{Path, PathBuf};

use base64::Engine;
use tracing::{debug, warn};

use super::environment::{BinaryFile, FileContent, SandboxError};
use crate::security::{normalize_path, validate_file_path, SecurityError, WORKSPACE_ROOT};

/// Images up to this size are returned with an inline data-URL preview
pub const MAX_IMAGE_PREVIEW_BYTES: u64 = 2 * 1024 * 1024;

/// Bytes inspected for NUL when sniffing text vs binary
const SNIFF_LEN: usize = 8192;

#[derive(Debug, Clone)]
pub struct Workspace {
    host_root: PathBuf,
}

impl Workspace {
    /// Create the host directory if needed and pin its canonical location
    pub fn create(host_root: impl Into<PathBuf>) -> Result<Self, SandboxError> {
        let host_root = host_root.into();
        std::fs::create_dir_all(&host_root)?;
        let host_root = host_root.canonicalize()?;
        Ok(Self { host_root })
    }

    pub fn host_root(&self) -> &Path {
        &self.host_root
    }

    /// Map an in-sandbox path to its host location.
    ///
    /// Rejects anything that does not normalize to `/workspace` or below.
    pub fn host_path(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let outside = || SecurityError::PathOutsideWorkspace {
            path: path.to_string(),
            base: WORKSPACE_ROOT.to_string(),
        };

        if !validate_file_path(path, WORKSPACE_ROOT) {
            return Err(outside().into());
        }
        let normalized = normalize_path(path).ok_or_else(outside)?;
        let relative = normalized
            .strip_prefix(WORKSPACE_ROOT)
            .map_err(|_| outside())?;

        let host = self.host_root.join(relative);
        self.ensure_no_escape(&host, path)?;
        Ok(host)
    }

    /// Reject paths whose existing prefix resolves (through symlinks) outside the root
    fn ensure_no_escape(&self, host: &Path, original: &str) -> Result<(), SandboxError> {
        let mut ancestor = host;
        loop {
            if ancestor.exists() {
                let canonical = ancestor.canonicalize()?;
                if !canonical.starts_with(&self.host_root) {
                    return Err(SecurityError::PathOutsideWorkspace {
                        path: original.to_string(),
                        base: WORKSPACE_ROOT.to_string(),
                    }
                    .into());
                }
                return Ok(());
            }
            match ancestor.parent() {
                Some(parent) => ancestor = parent,
                None => return Ok(()),
            }
        }
    }

    pub async fn read(&self, path: &str) -> Result<FileContent, SandboxError> {
        let host = self.host_path(path)?;
        if !host.is_file() {
            return Err(SandboxError::NotFound(path.to_string()));
        }

        let bytes = tokio::fs::read(&host)
            .await
            .map_err(|e| SandboxError::Unreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        Ok(classify(&host, bytes))
    }

    pub async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let host = self.host_path(path)?;
        if !host.is_file() {
            return Err(SandboxError::NotFound(path.to_string()));
        }
        tokio::fs::read(&host)
            .await
            .map_err(|e| SandboxError::Unreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    pub async fn write(&self, path: &str, content: &[u8]) -> Result<bool, SandboxError> {
        let host = self.host_path(path)?;

        if let Ok(meta) = tokio::fs::symlink_metadata(&host).await {
            if meta.file_type().is_symlink() || meta.is_dir() {
                warn!(path, "Refusing to write through symlink or over a directory");
                return Ok(false);
            }
        }

        if let Some(parent) = host.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(path, error = %e, "Failed to create parent directories");
                return Ok(false);
            }
        }

        match tokio::fs::write(&host, content).await {
            Ok(()) => {
                debug!(path, bytes = content.len(), "File written");
                Ok(true)
            }
            Err(e) => {
                warn!(path, error = %e, "File write failed");
                Ok(false)
            }
        }
    }

    /// Host directory for an in-sandbox working directory, created if missing
    pub async fn workdir(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let host = self.host_path(path)?;
        tokio::fs::create_dir_all(&host).await?;
        Ok(host)
    }

    /// Delete everything inside the workspace, keeping the root directory
    pub async fn wipe(&self) -> Result<(), SandboxError> {
        let mut entries = tokio::fs::read_dir(&self.host_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }
}

fn classify(host: &Path, bytes: Vec<u8>) -> FileContent {
    let by_extension = mime_from_extension(host);
    let forced_binary = by_extension
        .map(|m| !m.starts_with("text/") && m != "image/svg+xml")
        .unwrap_or(false);

    if !forced_binary {
        let sniff = &bytes[..bytes.len().min(SNIFF_LEN)];
        if !sniff.contains(&0) {
            match String::from_utf8(bytes) {
                Ok(text) => return FileContent::Text(text),
                Err(e) => return binary_descriptor(host, by_extension, e.into_bytes()),
            }
        }
    }

    binary_descriptor(host, by_extension, bytes)
}

fn binary_descriptor(host: &Path, by_extension: Option<&str>, bytes: Vec<u8>) -> FileContent {
    let mime_type = by_extension
        .map(str::to_string)
        .unwrap_or_else(|| mime_from_magic(&bytes).to_string());
    let size = bytes.len() as u64;

    let preview = if mime_type.starts_with("image/") && size <= MAX_IMAGE_PREVIEW_BYTES {
        Some(format!(
            "data:{};base64,{}",
            mime_type,
            base64::engine::general_purpose::STANDARD.encode(&bytes)
        ))
    } else {
        None
    };

    FileContent::Binary(BinaryFile {
        filename: host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        mime_type,
        size,
        preview,
    })
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "tar" => "application/x-tar",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "bin" | "exe" | "dll" | "so" | "o" => "application/octet-stream",
        "txt" | "log" => "text/plain",
        "csv" => "text/csv",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "md" => "text/markdown",
        _ => return None,
    };
    Some(mime)
}

fn mime_from_magic(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        [b'%', b'P', b'D', b'F', ..] => "application/pdf",
        [b'P', b'K', 0x03, 0x04, ..] => "application/zip",
        [0x1F, 0x8B, ..] => "application/gzip",
        [0x7F, b'E', b'L', b'F', ..] => "application/x-executable",
        _ => "application/octet-stream",
    }
}
