//! On-disk reassembly of chunked uploads.
//!
//! Chunks of a file are appended to `<name>.<totalSize>.upload` next to the
//! final location. The first chunk (re)creates that accumulation, the last
//! one renames it into place. A single-chunk upload is written directly.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::EndpointError;
use crate::path::{validate_file_name, validate_upload_path};

/// Identifies one file being uploaded.
#[derive(Debug, Clone, Copy)]
pub struct UploadKey<'a> {
    pub relative_path: Option<&'a str>,
    pub filename: &'a str,
    pub total_size: u64,
}

/// One received chunk.
#[derive(Debug, Clone, Copy)]
pub struct ChunkUpload<'a> {
    pub key: UploadKey<'a>,
    pub is_first: bool,
    pub is_last: bool,
    pub data: &'a [u8],
}

/// Where a chunk left its file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stored {
    /// Written in one request.
    Whole(PathBuf),
    /// Appended; `received` bytes are accumulated so far.
    Partial { received: u64 },
    /// The last chunk completed the file.
    Complete(PathBuf),
}

#[derive(Debug)]
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    /// Opens (creating if needed) the upload directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, EndpointError> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!(dir = %root.display(), "upload directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final and accumulation paths for `key`.
    fn paths(&self, key: &UploadKey<'_>) -> Result<(PathBuf, PathBuf), EndpointError> {
        validate_file_name(key.filename)?;
        let dir = match key.relative_path.filter(|p| !p.is_empty()) {
            Some(relative) => {
                validate_upload_path(relative)?;
                self.root.join(relative)
            }
            None => self.root.clone(),
        };
        let temp = dir.join(format!("{}.{}.upload", key.filename, key.total_size));
        Ok((dir.join(key.filename), temp))
    }

    /// Bytes already accumulated for `key`, if an upload is in progress.
    pub async fn offset(&self, key: &UploadKey<'_>) -> Result<Option<u64>, EndpointError> {
        let (_, temp) = self.paths(key)?;
        match fs::metadata(&temp).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn store_chunk(&self, chunk: ChunkUpload<'_>) -> Result<Stored, EndpointError> {
        let (target, temp) = self.paths(&chunk.key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        if chunk.is_first && chunk.is_last {
            fs::write(&target, chunk.data).await?;
            info!(file = %target.display(), bytes = chunk.data.len(), "file stored in one chunk");
            return Ok(Stored::Whole(target));
        }

        if chunk.is_first {
            fs::write(&temp, chunk.data).await?;
            debug!(file = %temp.display(), bytes = chunk.data.len(), "upload started");
            return Ok(Stored::Partial {
                received: chunk.data.len() as u64,
            });
        }

        let mut file = match fs::OpenOptions::new().append(true).open(&temp).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(EndpointError::NeedsRestart),
            Err(e) => return Err(e.into()),
        };
        file.write_all(chunk.data).await?;
        file.flush().await?;
        let received = file.metadata().await?.len();
        drop(file);

        if chunk.is_last {
            fs::rename(&temp, &target).await?;
            info!(file = %target.display(), bytes = received, "upload complete");
            return Ok(Stored::Complete(target));
        }
        debug!(file = %temp.display(), received, "chunk appended");
        Ok(Stored::Partial { received })
    }
}
