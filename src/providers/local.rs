//! Local filesystem backend

use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use twincom_plugin_api::{
    directory_size, validate_child_name, BackendFactory, BackendInfo, DirRef, DirectoryHandle,
    FileHandle, FileRef, FsError, FsResult, InputStream, OutputStream,
};
use url::Url;

pub const LOCAL_SCHEME: &str = "file";

/// Factory for handles on the host file system
#[derive(Debug)]
pub struct LocalBackend {
    info: BackendInfo,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    /// Create a new local backend
    pub fn new() -> Self {
        Self {
            info: BackendInfo::new("Local", LOCAL_SCHEME)
                .with_description("Local filesystem"),
        }
    }

    /// Handle for a native path: a directory handle if the path is an
    /// existing directory, a file handle otherwise
    pub fn handle(path: impl Into<PathBuf>) -> FileRef {
        let path = path.into();
        if path.is_dir() {
            Arc::new(LocalDirectory { path })
        } else {
            Arc::new(LocalFile { path })
        }
    }
}

impl BackendFactory for LocalBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn new_instance(&self, uri: &Url) -> FsResult<FileRef> {
        let path = uri
            .to_file_path()
            .map_err(|_| FsError::MalformedUri(format!("{} is not a local path", uri)))?;
        Ok(Self::handle(path))
    }
}

/// Render a native path as a `file:` URI
fn path_to_uri(path: &Path) -> String {
    match Url::from_file_path(path) {
        Ok(url) => url.to_string(),
        Err(()) => format!("{}://{}", LOCAL_SCHEME, path.display()),
    }
}

fn name_of(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn parent_of(path: &Path) -> Option<DirRef> {
    path.parent().map(|p| {
        Arc::new(LocalDirectory {
            path: p.to_path_buf(),
        }) as DirRef
    })
}

fn exists_at(path: &Path) -> FsResult<bool> {
    path.try_exists().map_err(FsError::from)
}

fn modified_at(path: &Path) -> FsResult<Option<SystemTime>> {
    let meta = fs::metadata(path)?;
    Ok(meta.modified().ok())
}

fn set_modified_at(path: &Path, time: SystemTime) -> FsResult<()> {
    filetime::set_file_mtime(path, filetime::FileTime::from_system_time(time))?;
    Ok(())
}

/// Create the directory at `path` unless a directory is already there
fn ensure_directory(path: &Path) -> FsResult<DirRef> {
    if !exists_at(path)? {
        match fs::create_dir(path) {
            Ok(()) => {}
            // Lost a race against another creator; fine as long as it is a directory
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && path.is_dir() => {}
            Err(e) => return Err(e.into()),
        }
    } else if !path.is_dir() {
        return Err(FsError::AlreadyExists(format!(
            "cannot create directory {}, a regular file with this path already exists",
            path.display()
        )));
    }
    Ok(Arc::new(LocalDirectory {
        path: path.to_path_buf(),
    }))
}

/// A path on the host file system with file semantics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalFile {
    path: PathBuf,
}

impl LocalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Native path backing this handle
    pub fn native_path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for LocalFile {
    fn scheme(&self) -> &str {
        LOCAL_SCHEME
    }

    fn name(&self) -> String {
        name_of(&self.path)
    }

    fn path(&self) -> String {
        path_to_uri(&self.path)
    }

    fn parent(&self) -> Option<DirRef> {
        parent_of(&self.path)
    }

    fn size(&self) -> FsResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    fn exists(&self) -> FsResult<bool> {
        exists_at(&self.path)
    }

    fn create(&self) -> FsResult<()> {
        // No truncation: an existing file keeps its content
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        Ok(())
    }

    fn create_directory(&self) -> FsResult<DirRef> {
        ensure_directory(&self.path)
    }

    fn delete(&self) -> FsResult<()> {
        if self.path.is_dir() {
            fs::remove_dir(&self.path)?;
        } else {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn input_stream(&self) -> FsResult<InputStream> {
        if self.path.is_dir() {
            return Err(FsError::NotSupported(format!(
                "cannot open input stream of directory {}",
                self.path.display()
            )));
        }
        let file = fs::File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn output_stream(&self) -> FsResult<OutputStream> {
        if self.path.is_dir() {
            return Err(FsError::NotSupported(format!(
                "cannot open output stream of directory {}",
                self.path.display()
            )));
        }
        if !exists_at(&self.path)? {
            self.create()?;
        }
        let file = fs::File::create(&self.path)?;
        Ok(Box::new(BufWriter::new(file)))
    }

    fn modified(&self) -> FsResult<Option<SystemTime>> {
        modified_at(&self.path)
    }

    fn set_modified(&self, time: SystemTime) -> FsResult<()> {
        set_modified_at(&self.path, time)
    }
}

/// A path on the host file system with directory semantics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    /// Directory handle for `path`. Fails if `path` exists and is not a directory.
    pub fn new(path: impl Into<PathBuf>) -> FsResult<Self> {
        let path = path.into();
        if exists_at(&path)? && !path.is_dir() {
            return Err(FsError::NotADirectory(path.display().to_string()));
        }
        Ok(Self { path })
    }

    pub fn native_path(&self) -> &Path {
        &self.path
    }
}

impl FileHandle for LocalDirectory {
    fn scheme(&self) -> &str {
        LOCAL_SCHEME
    }

    fn name(&self) -> String {
        name_of(&self.path)
    }

    fn path(&self) -> String {
        path_to_uri(&self.path)
    }

    fn parent(&self) -> Option<DirRef> {
        parent_of(&self.path)
    }

    fn size(&self) -> FsResult<u64> {
        directory_size(self)
    }

    fn exists(&self) -> FsResult<bool> {
        exists_at(&self.path)
    }

    fn create(&self) -> FsResult<()> {
        ensure_directory(&self.path).map(|_| ())
    }

    fn create_directory(&self) -> FsResult<DirRef> {
        ensure_directory(&self.path)
    }

    fn delete(&self) -> FsResult<()> {
        fs::remove_dir(&self.path)?;
        Ok(())
    }

    fn input_stream(&self) -> FsResult<InputStream> {
        Err(FsError::NotSupported(format!(
            "cannot open input stream of directory {}",
            self.path.display()
        )))
    }

    fn output_stream(&self) -> FsResult<OutputStream> {
        Err(FsError::NotSupported(format!(
            "cannot open output stream of directory {}",
            self.path.display()
        )))
    }

    fn modified(&self) -> FsResult<Option<SystemTime>> {
        modified_at(&self.path)
    }

    fn set_modified(&self, time: SystemTime) -> FsResult<()> {
        set_modified_at(&self.path, time)
    }

    fn is_directory(&self) -> bool {
        true
    }

    fn as_directory(self: Arc<Self>) -> Option<DirRef> {
        Some(self)
    }
}

impl DirectoryHandle for LocalDirectory {
    fn files(&self) -> FsResult<Vec<FileRef>> {
        let mut result = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            result.push(LocalBackend::handle(entry.path()));
        }
        Ok(result)
    }

    fn create_child(&self, name: &str) -> FsResult<FileRef> {
        validate_child_name(name)?;
        Ok(Arc::new(LocalFile {
            path: self.path.join(name),
        }))
    }

    fn into_file(self: Arc<Self>) -> FileRef {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn dir_handle(path: &Path) -> DirRef {
        LocalBackend::handle(path)
            .as_directory()
            .expect("temp dir should resolve to a directory")
    }

    #[test]
    fn test_handle_kind_follows_storage() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.txt"), b"hello").unwrap();

        assert!(LocalBackend::handle(tmp.path()).is_directory());
        assert!(!LocalBackend::handle(tmp.path().join("a.txt")).is_directory());
        // Missing paths get file semantics
        assert!(!LocalBackend::handle(tmp.path().join("missing")).is_directory());
    }

    #[test]
    fn test_size_of_file_and_directory() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("ten.bin"), [0u8; 10]).unwrap();
        fs::create_dir(tmp.path().join("sub")).unwrap();
        fs::write(tmp.path().join("sub/twenty.bin"), [1u8; 20]).unwrap();
        fs::create_dir(tmp.path().join("empty")).unwrap();

        let root = LocalBackend::handle(tmp.path());
        assert_eq!(root.size().unwrap(), 30);
        assert_eq!(LocalBackend::handle(tmp.path().join("ten.bin")).size().unwrap(), 10);
        assert_eq!(LocalBackend::handle(tmp.path().join("empty")).size().unwrap(), 0);
    }

    #[test]
    fn test_size_of_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = LocalBackend::handle(tmp.path().join("nope"));
        assert!(missing.size().is_err());
    }

    #[test]
    fn test_create_child_does_not_touch_storage() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = dir_handle(tmp.path());

        let child = dir.create_child("ghost.txt").unwrap();
        drop(child);
        let child = dir.create_child("ghost-dir").unwrap();
        assert!(!child.exists().unwrap());

        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_create_child_rejects_separators() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = dir_handle(tmp.path());
        assert!(matches!(dir.create_child("../escape"), Err(FsError::InvalidName(_))));
        assert!(matches!(dir.create_child(""), Err(FsError::InvalidName(_))));
    }

    #[test]
    fn test_create_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let file = dir_handle(tmp.path()).create_child("data.txt").unwrap();

        file.create().unwrap();
        fs::write(tmp.path().join("data.txt"), b"keep me").unwrap();
        file.create().unwrap();

        assert_eq!(fs::read(tmp.path().join("data.txt")).unwrap(), b"keep me");
    }

    #[test]
    fn test_create_directory_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let child = dir_handle(tmp.path()).create_child("nested").unwrap();

        let first = child.create_directory().unwrap();
        let second = child.create_directory().unwrap();
        assert!(tmp.path().join("nested").is_dir());
        assert!(*first == *second);
    }

    #[test]
    fn test_create_directory_over_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("plain"), b"x").unwrap();
        let handle = LocalBackend::handle(tmp.path().join("plain"));
        assert!(matches!(handle.create_directory(), Err(FsError::AlreadyExists(_))));
    }

    #[test]
    fn test_streams_on_directory_not_supported() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = LocalBackend::handle(tmp.path());
        assert!(matches!(dir.input_stream(), Err(FsError::NotSupported(_))));
        assert!(matches!(dir.output_stream(), Err(FsError::NotSupported(_))));

        // A file handle whose path turned into a directory behaves the same
        let file = dir_handle(tmp.path()).create_child("later").unwrap();
        fs::create_dir(tmp.path().join("later")).unwrap();
        assert!(matches!(file.output_stream(), Err(FsError::NotSupported(_))));
    }

    #[test]
    fn test_output_stream_creates_and_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let file = dir_handle(tmp.path()).create_child("out.txt").unwrap();

        let mut out = file.output_stream().unwrap();
        out.write_all(b"first version").unwrap();
        out.flush().unwrap();
        drop(out);

        let mut out = file.output_stream().unwrap();
        out.write_all(b"second").unwrap();
        out.flush().unwrap();
        drop(out);

        let mut content = String::new();
        file.input_stream().unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "second");
    }

    #[test]
    fn test_listing_missing_directory_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = LocalDirectory::new(tmp.path().join("missing")).unwrap();
        assert!(dir.files().is_err());
    }

    #[test]
    fn test_equality_ignores_handle_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let as_dir = LocalBackend::handle(tmp.path());
        let as_file: FileRef = Arc::new(LocalFile::new(tmp.path()));
        assert!(*as_dir == *as_file);

        let other: FileRef = Arc::new(LocalFile::new(tmp.path().join("x")));
        assert!(*as_dir != *other);
    }

    #[test]
    fn test_parent_and_name() {
        let tmp = tempfile::tempdir().unwrap();
        let file = LocalBackend::handle(tmp.path().join("note.md"));
        assert_eq!(file.name(), "note.md");
        assert!(file.path().starts_with("file://"));

        let parent = file.parent().unwrap();
        assert_eq!(parent.key(), LocalBackend::handle(tmp.path()).key());
    }

    #[test]
    fn test_new_instance_from_uri() {
        let tmp = tempfile::tempdir().unwrap();
        let url = Url::from_file_path(tmp.path()).unwrap();
        let handle = LocalBackend::new().new_instance(&url).unwrap();
        assert!(handle.is_directory());

        let bogus = Url::parse("file://remote-host/share").unwrap();
        let result = LocalBackend::new().new_instance(&bogus);
        if cfg!(unix) {
            assert!(matches!(result, Err(FsError::MalformedUri(_))));
        }
    }
}
