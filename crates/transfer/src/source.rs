//! Byte sources the queue can upload from.

use std::future::Future;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::TransferError;

/// Boxed future returned by [`FileSource::read_range`].
pub type ReadFuture<'a> = Pin<Box<dyn Future<Output = std::io::Result<Bytes>> + Send + 'a>>;

/// Something with a name, a size and random-access bytes.
///
/// Reads happen on background tasks, so implementations must be shareable.
pub trait FileSource: Send + Sync {
    /// Base name, without directories.
    fn name(&self) -> &str;

    /// Size in bytes, fixed for the lifetime of the upload.
    fn size(&self) -> u64;

    /// Path relative to the selection root, including the file name
    /// (e.g. `photos/2024/a.jpg`). `None` for files picked individually.
    fn relative_path(&self) -> Option<&str> {
        None
    }

    /// Reads bytes `start..end`. Fails if the source shrank or vanished.
    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_>;
}

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    size: u64,
    relative_path: Option<String>,
}

impl LocalFile {
    /// Builds a source from a path whose size is already known.
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            size,
            relative_path: None,
        }
    }

    /// Stats `path` and builds a source for it.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(TransferError::NotAFile(path.display().to_string()));
        }
        Ok(Self::new(path, metadata.len()))
    }

    /// Attaches the path relative to the selection root.
    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        Box::pin(async move {
            let len = end.saturating_sub(start) as usize;
            let mut file = tokio::fs::File::open(&self.path).await?;
            file.seek(SeekFrom::Start(start)).await?;
            let mut buf = vec![0u8; len];
            file.read_exact(&mut buf).await?;
            Ok(Bytes::from(buf))
        })
    }
}

/// An in-memory payload.
#[derive(Debug, Clone)]
pub struct MemoryFile {
    name: String,
    data: Bytes,
    relative_path: Option<String>,
}

impl MemoryFile {
    pub fn new(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
            relative_path: None,
        }
    }

    pub fn with_relative_path(mut self, relative_path: impl Into<String>) -> Self {
        self.relative_path = Some(relative_path.into());
        self
    }
}

impl FileSource for MemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn relative_path(&self) -> Option<&str> {
        self.relative_path.as_deref()
    }

    fn read_range(&self, start: u64, end: u64) -> ReadFuture<'_> {
        let len = self.data.len() as u64;
        let result = if start <= end && end <= len {
            Ok(self.data.slice(start as usize..end as usize))
        } else {
            Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("range {start}..{end} outside {len} bytes"),
            ))
        };
        Box::pin(async move { result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn local_file_reads_ranges() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&data)
            .unwrap();

        let source = LocalFile::open(&path).await.unwrap();
        assert_eq!(source.name(), "data.bin");
        assert_eq!(source.size(), 10_000);
        assert!(source.relative_path().is_none());

        let bytes = source.read_range(4096, 5000).await.unwrap();
        assert_eq!(&bytes[..], &data[4096..5000]);

        let empty = source.read_range(10_000, 10_000).await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn local_file_read_past_end_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.bin");
        std::fs::write(&path, b"abc").unwrap();

        // Size recorded larger than the file, as after truncation.
        let source = LocalFile::new(&path, 100);
        assert!(source.read_range(0, 100).await.is_err());
    }

    #[tokio::test]
    async fn local_file_open_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalFile::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, TransferError::NotAFile(_)));
    }

    #[tokio::test]
    async fn memory_file_slices() {
        let source = MemoryFile::new("m.txt", &b"hello world"[..]).with_relative_path("docs/m.txt");
        assert_eq!(source.size(), 11);
        assert_eq!(source.relative_path(), Some("docs/m.txt"));
        assert_eq!(&source.read_range(6, 11).await.unwrap()[..], b"world");
        assert!(source.read_range(6, 12).await.is_err());
    }
}
