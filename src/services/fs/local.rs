//! Local filesystem backend built on `tokio::fs`

use super::backend::{BackendError, FsBackend, FsEntryType, FsMetadata};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

/// Backend that talks to the native filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFsBackend;

impl LocalFsBackend {
    pub fn new() -> Self {
        Self
    }

    fn build_metadata(meta: &std::fs::Metadata) -> FsMetadata {
        let entry_type = if meta.is_dir() {
            FsEntryType::Directory
        } else if meta.file_type().is_symlink() {
            FsEntryType::Symlink
        } else {
            FsEntryType::File
        };

        FsMetadata {
            size: meta.len(),
            modified: meta.modified().ok(),
            entry_type,
            is_readonly: meta.permissions().readonly(),
        }
    }
}

#[async_trait]
impl FsBackend for LocalFsBackend {
    async fn stat(&self, path: &Path) -> Result<FsMetadata, BackendError> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(Self::build_metadata(&meta))
    }

    async fn read_all(&self, path: &Path) -> Result<Bytes, BackendError> {
        let data = tokio::fs::read(path).await?;
        Ok(Bytes::from(data))
    }

    async fn write_all(&self, path: &Path, data: Bytes) -> Result<(), BackendError> {
        tokio::fs::write(path, &data).await?;
        Ok(())
    }
}
