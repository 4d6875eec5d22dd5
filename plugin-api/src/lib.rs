//! Twincom Backend API
//!
//! This crate defines the contract every storage backend implements:
//! - **Handles**: [`FileHandle`] and [`DirectoryHandle`] reference a path in
//!   some backing store, whether or not it exists yet
//! - **Factories**: [`BackendFactory`] turns a URI of one scheme into a handle
//! - **Errors**: [`FsError`], shared by every backend
//!
//! The core resolves factories by URI scheme and never depends on concrete
//! backend types, so a new storage scheme only needs this crate.

use std::fmt;
use std::io::{self, Read, Seek, Write};
use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use url::Url;

// ============================================================================
// ERRORS
// ============================================================================

/// Result type for file system operations
pub type FsResult<T> = Result<T, FsError>;

/// Errors raised by backends and by provider resolution
#[derive(Error, Debug)]
pub enum FsError {
    /// Permission denied by the backing store
    #[error("Access denied: {0}")]
    Access(String),
    /// Transient or persistent storage failure
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
    /// The operation makes no sense for this handle or backend
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    /// A different kind of entry already occupies the path
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    /// A directory was required
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    /// A child name that cannot designate a single path segment
    #[error("Invalid name: {0:?}")]
    InvalidName(String),
    /// No installed backend handles the scheme
    #[error("No provider for scheme '{0}'")]
    NoProvider(String),
    /// The location could not be parsed
    #[error("Malformed URI: {0}")]
    MalformedUri(String),
}

impl From<io::Error> for FsError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => FsError::Access(err.to_string()),
            _ => FsError::Io(err),
        }
    }
}

impl FsError {
    /// True for permission failures, which callers can always recover from
    pub fn is_access(&self) -> bool {
        matches!(self, FsError::Access(_))
    }
}

// ============================================================================
// HANDLES
// ============================================================================

/// Shared reference to any handle
pub type FileRef = Arc<dyn FileHandle>;

/// Shared reference to a directory handle
pub type DirRef = Arc<dyn DirectoryHandle>;

/// Readable stream returned by [`FileHandle::input_stream`]
pub type InputStream = Box<dyn Read + Send>;

/// Writable stream returned by [`FileHandle::output_stream`]
pub type OutputStream = Box<dyn WriteStream>;

/// Output streams are seekable so archive writers can patch headers
pub trait WriteStream: Write + Seek + Send {}

impl<T: Write + Seek + Send> WriteStream for T {}

/// Identity of a handle: two handles are equal iff their keys are equal
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleKey {
    pub scheme: String,
    pub path: String,
}

/// A path in some backing store, which may or may not exist.
///
/// Handles are immutable. Existence is checked on every call and never
/// cached, so a handle created before its file is still valid afterwards.
pub trait FileHandle: Send + Sync + fmt::Debug {
    /// Scheme of the owning backend (e.g. "file")
    fn scheme(&self) -> &str;

    /// Last path segment
    fn name(&self) -> String;

    /// Absolute location as a URI string
    fn path(&self) -> String;

    /// Parent directory, or `None` at the root
    fn parent(&self) -> Option<DirRef>;

    /// Size in bytes; directories report the recursive sum of their children
    fn size(&self) -> FsResult<u64>;

    /// Whether the path currently exists
    fn exists(&self) -> FsResult<bool>;

    /// Create an empty file. Creating an existing file is a no-op.
    fn create(&self) -> FsResult<()>;

    /// Create a directory at this path and return a directory handle.
    /// Idempotent for directories, fails for an existing regular file.
    fn create_directory(&self) -> FsResult<DirRef>;

    /// Delete a file or an empty directory
    fn delete(&self) -> FsResult<()>;

    /// Open the file for reading
    fn input_stream(&self) -> FsResult<InputStream>;

    /// Open the file for writing, creating it when missing and truncating it otherwise
    fn output_stream(&self) -> FsResult<OutputStream>;

    /// Last modification time, when the backend tracks one
    fn modified(&self) -> FsResult<Option<SystemTime>> {
        Ok(None)
    }

    /// Set the modification time.
    /// Default implementation reports the operation as unsupported.
    #[allow(unused_variables)]
    fn set_modified(&self, time: SystemTime) -> FsResult<()> {
        Err(FsError::NotSupported(format!(
            "{}: modification times are not supported by '{}'",
            self.path(),
            self.scheme()
        )))
    }

    /// True for handles that enumerate children
    fn is_directory(&self) -> bool {
        false
    }

    /// Directory view of this handle, if it is one
    fn as_directory(self: Arc<Self>) -> Option<DirRef> {
        None
    }

    /// Identity used for equality and hashing
    fn key(&self) -> HandleKey {
        HandleKey {
            scheme: self.scheme().to_string(),
            path: self.path(),
        }
    }
}

/// A handle that can enumerate and create children
pub trait DirectoryHandle: FileHandle {
    /// List the direct children.
    /// A missing directory is an error, never an empty listing.
    fn files(&self) -> FsResult<Vec<FileRef>>;

    /// Build a handle for `name` under this directory without touching storage
    fn create_child(&self, name: &str) -> FsResult<FileRef>;

    /// This handle as a plain file handle
    fn into_file(self: Arc<Self>) -> FileRef;
}

impl PartialEq for dyn FileHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for dyn FileHandle {}

impl PartialEq for dyn DirectoryHandle {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for dyn DirectoryHandle {}

/// Recursive size of a directory: the sum of its children's sizes.
///
/// Fails as a whole on the first access or I/O error; no partial total is
/// returned.
pub fn directory_size(dir: &dyn DirectoryHandle) -> FsResult<u64> {
    let mut total = 0u64;
    for child in dir.files()? {
        total = total.saturating_add(child.size()?);
    }
    Ok(total)
}

/// Check that `name` designates exactly one path segment
pub fn validate_child_name(name: &str) -> FsResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0');
    if invalid {
        return Err(FsError::InvalidName(name.to_string()));
    }
    Ok(())
}

// ============================================================================
// BACKEND FACTORY
// ============================================================================

/// Information about an installed backend
#[derive(Debug, Clone)]
pub struct BackendInfo {
    /// Display name (e.g., "Local")
    pub name: String,
    /// URI scheme handled (e.g., "file")
    pub scheme: String,
    /// Short description
    pub description: String,
}

impl BackendInfo {
    pub fn new(name: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: scheme.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }
}

/// Produces handles for one URI scheme.
///
/// Factories are stateless from the registry's point of view: resolving
/// the same scheme twice may return either instance.
pub trait BackendFactory: Send + Sync {
    /// Backend information
    fn info(&self) -> &BackendInfo;

    /// Scheme this factory is registered under
    fn scheme(&self) -> &str {
        &self.info().scheme
    }

    /// Create a handle for `uri`: a directory handle when the location is an
    /// existing directory, a file handle otherwise
    fn new_instance(&self, uri: &Url) -> FsResult<FileRef>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_denied_maps_to_access() {
        let err = FsError::from(io::Error::new(io::ErrorKind::PermissionDenied, "nope"));
        assert!(err.is_access());

        let err = FsError::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(matches!(err, FsError::Io(_)));
    }

    #[test]
    fn test_child_name_validation() {
        assert!(validate_child_name("report.txt").is_ok());
        assert!(validate_child_name(".hidden").is_ok());
        assert!(validate_child_name("").is_err());
        assert!(validate_child_name("..").is_err());
        assert!(validate_child_name("a/b").is_err());
        assert!(validate_child_name("a\\b").is_err());
    }

    #[test]
    fn test_backend_info_builder() {
        let info = BackendInfo::new("Local", "file").with_description("Host file system");
        assert_eq!(info.scheme, "file");
        assert_eq!(info.description, "Host file system");
    }
}
