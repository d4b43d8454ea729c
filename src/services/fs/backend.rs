use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::path::Path;
use std::time::SystemTime;

/// Type of filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEntryType {
    File,
    Directory,
    Symlink,
}

/// Backend operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsOp {
    Stat,
    Read,
    Write,
}

/// Metadata about a filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsMetadata {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub entry_type: FsEntryType,
    pub is_readonly: bool,
}

impl FsMetadata {
    /// Metadata for a regular file of `size` bytes
    pub fn file(size: u64) -> Self {
        Self {
            size,
            modified: None,
            entry_type: FsEntryType::File,
            is_readonly: false,
        }
    }

    /// Metadata for a directory
    pub fn directory() -> Self {
        Self {
            size: 0,
            modified: None,
            entry_type: FsEntryType::Directory,
            is_readonly: false,
        }
    }

    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }

    pub fn with_entry_type(mut self, entry_type: FsEntryType) -> Self {
        self.entry_type = entry_type;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.is_readonly = readonly;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.entry_type == FsEntryType::Directory
    }

    pub fn is_file(&self) -> bool {
        self.entry_type == FsEntryType::File
    }
}

/// Failure reported by a backend call
///
/// `Path` failures belong to the one request that triggered them and are
/// handled per operation kind. `Systemic` failures say nothing about the
/// path in question (descriptor or memory exhaustion, a dropped mount, ...)
/// and abort the whole drain pass.
#[derive(Debug)]
pub enum BackendError {
    Path(io::Error),
    Systemic(io::Error),
}

impl BackendError {
    pub fn is_systemic(&self) -> bool {
        matches!(self, BackendError::Systemic(_))
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.io_error().kind()
    }

    pub fn io_error(&self) -> &io::Error {
        match self {
            BackendError::Path(e) | BackendError::Systemic(e) => e,
        }
    }

    pub fn into_io_error(self) -> io::Error {
        match self {
            BackendError::Path(e) | BackendError::Systemic(e) => e,
        }
    }
}

impl From<io::Error> for BackendError {
    /// Classify an I/O error: resource exhaustion is systemic, the rest is
    /// attributed to the path being operated on.
    fn from(err: io::Error) -> Self {
        if is_resource_exhaustion(&err) {
            BackendError::Systemic(err)
        } else {
            BackendError::Path(err)
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Path(e) => write!(f, "I/O error: {e}"),
            BackendError::Systemic(e) => write!(f, "systemic backend fault: {e}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.io_error())
    }
}

fn is_resource_exhaustion(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}

/// Async filesystem backend trait
///
/// The primitives the coordinator drains its queues through. Every call may
/// fail; the coordinator decides per operation kind what a failure means.
#[async_trait]
pub trait FsBackend: Send + Sync {
    /// Get metadata for a path
    ///
    /// # Errors
    ///
    /// Returns an error if the path doesn't exist or cannot be inspected.
    async fn stat(&self, path: &Path) -> Result<FsMetadata, BackendError>;

    /// Read an entire file into memory
    async fn read_all(&self, path: &Path) -> Result<Bytes, BackendError>;

    /// Replace the contents of a file, creating it if necessary
    async fn write_all(&self, path: &Path, data: Bytes) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_builder() {
        let metadata = FsMetadata::file(512)
            .with_readonly(true)
            .with_entry_type(FsEntryType::Symlink);

        assert_eq!(metadata.size, 512);
        assert!(metadata.is_readonly);
        assert_eq!(metadata.entry_type, FsEntryType::Symlink);
        assert!(!metadata.is_file());
        assert!(FsMetadata::directory().is_dir());
    }

    #[test]
    fn test_not_found_is_path_error() {
        let err = BackendError::from(io::Error::from(io::ErrorKind::NotFound));
        assert!(!err.is_systemic());
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_permission_denied_is_path_error() {
        let err = BackendError::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(!err.is_systemic());
    }

    #[test]
    fn test_out_of_memory_is_systemic() {
        let err = BackendError::from(io::Error::from(io::ErrorKind::OutOfMemory));
        assert!(err.is_systemic());
        assert!(err.to_string().starts_with("systemic backend fault"));
    }

    #[cfg(unix)]
    #[test]
    fn test_descriptor_exhaustion_is_systemic() {
        let err = BackendError::from(io::Error::from_raw_os_error(libc::EMFILE));
        assert!(err.is_systemic());

        let err = BackendError::from(io::Error::from_raw_os_error(libc::ENFILE));
        assert!(err.is_systemic());
    }
}
