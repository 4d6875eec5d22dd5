//! In-memory backend (`mem:` scheme).
//!
//! Used for scratch space and testing. All data is lost when the store is
//! dropped. Paths can be marked as denied to simulate permission failures.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, Cursor, Seek, SeekFrom, Write};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use twincom_plugin_api::{
    directory_size, validate_child_name, BackendFactory, BackendInfo, DirRef, DirectoryHandle,
    FileHandle, FileRef, FsError, FsResult, InputStream, OutputStream,
};
use url::Url;

pub const MEMORY_SCHEME: &str = "mem";

#[derive(Debug, Clone)]
enum Node {
    File { data: Vec<u8>, modified: SystemTime },
    Directory { modified: SystemTime },
}

/// Thread-safe tree of in-memory files keyed by normalized absolute path
#[derive(Debug)]
pub struct MemoryStore {
    nodes: RwLock<BTreeMap<String, Node>>,
    denied: RwLock<BTreeSet<String>>,
}

/// Normalize a path: always absolute, `.` dropped and `..` resolved
fn normalize(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    format!("/{}", segments.join("/"))
}

fn parent_path(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(i) => Some(path[..i].to_string()),
        None => None,
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Key prefix shared by everything below `dir`; never matches `dir` itself
fn child_prefix(dir: &str) -> String {
    if dir == "/" {
        dir.to_string()
    } else {
        format!("{}/", dir)
    }
}

fn not_found(path: &str) -> FsError {
    FsError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("not found: {}", path),
    ))
}

impl MemoryStore {
    /// Create an empty store holding only the root directory
    pub fn new() -> Arc<Self> {
        let mut nodes = BTreeMap::new();
        nodes.insert(
            "/".to_string(),
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Arc::new(Self {
            nodes: RwLock::new(nodes),
            denied: RwLock::new(BTreeSet::new()),
        })
    }

    fn read_nodes(&self) -> RwLockReadGuard<'_, BTreeMap<String, Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_nodes(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Node>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Root directory handle
    pub fn root(self: &Arc<Self>) -> DirRef {
        Arc::new(MemoryDirectory {
            store: Arc::clone(self),
            path: "/".to_string(),
        })
    }

    /// Handle for `path`: a directory handle if a directory exists there
    pub fn handle(self: &Arc<Self>, path: &str) -> FileRef {
        let path = normalize(path);
        let is_dir = matches!(self.read_nodes().get(&path), Some(Node::Directory { .. }));
        if is_dir {
            Arc::new(MemoryDirectory {
                store: Arc::clone(self),
                path,
            })
        } else {
            Arc::new(MemoryFile {
                store: Arc::clone(self),
                path,
            })
        }
    }

    /// Make every operation on `path` and below fail with an access error
    pub fn deny(&self, path: &str) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(normalize(path));
    }

    pub fn allow(&self, path: &str) {
        self.denied
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&normalize(path));
    }

    /// Create a directory and all its parents
    pub fn create_dir_all(&self, path: &str) -> FsResult<()> {
        let path = normalize(path);
        self.check_access(&path)?;
        let mut nodes = self.write_nodes();
        let mut current = String::from("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = join(&current, segment);
            match nodes.get(&current) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => return Err(FsError::NotADirectory(current)),
                None => {
                    nodes.insert(
                        current.clone(),
                        Node::Directory {
                            modified: SystemTime::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Write a whole file, creating parent directories
    pub fn write_file(&self, path: &str, data: impl Into<Vec<u8>>) -> FsResult<()> {
        let path = normalize(path);
        if let Some(parent) = parent_path(&path) {
            self.create_dir_all(&parent)?;
        }
        self.commit(&path, data.into())
    }

    /// Content of a file, `None` if there is no file at `path`
    pub fn read_file(&self, path: &str) -> Option<Vec<u8>> {
        match self.read_nodes().get(&normalize(path)) {
            Some(Node::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    fn check_access(&self, path: &str) -> FsResult<()> {
        let denied = self.denied.read().unwrap_or_else(PoisonError::into_inner);
        let blocked = denied
            .iter()
            .any(|d| d == "/" || path == d || path.starts_with(&format!("{}/", d)));
        if blocked {
            return Err(FsError::Access(format!("{}: permission denied", path)));
        }
        Ok(())
    }

    fn require_parent_dir(nodes: &BTreeMap<String, Node>, path: &str) -> FsResult<()> {
        let Some(parent) = parent_path(path) else {
            return Ok(());
        };
        match nodes.get(&parent) {
            Some(Node::Directory { .. }) => Ok(()),
            Some(Node::File { .. }) => Err(FsError::NotADirectory(parent)),
            None => Err(not_found(&parent)),
        }
    }

    /// Store `data` as the content of the file at `path`
    fn commit(&self, path: &str, data: Vec<u8>) -> FsResult<()> {
        self.check_access(path)?;
        let mut nodes = self.write_nodes();
        Self::require_parent_dir(&nodes, path)?;
        match nodes.get(path) {
            Some(Node::Directory { .. }) => Err(FsError::NotSupported(format!(
                "cannot write to directory {}",
                path
            ))),
            _ => {
                nodes.insert(
                    path.to_string(),
                    Node::File {
                        data,
                        modified: SystemTime::now(),
                    },
                );
                Ok(())
            }
        }
    }

    fn exists(&self, path: &str) -> FsResult<bool> {
        self.check_access(path)?;
        Ok(self.read_nodes().contains_key(path))
    }

    fn file_size(&self, path: &str) -> FsResult<u64> {
        self.check_access(path)?;
        match self.read_nodes().get(path) {
            Some(Node::File { data, .. }) => Ok(data.len() as u64),
            Some(Node::Directory { .. }) => Ok(0),
            None => Err(not_found(path)),
        }
    }

    fn create_file(&self, path: &str) -> FsResult<()> {
        self.check_access(path)?;
        let mut nodes = self.write_nodes();
        match nodes.get(path) {
            Some(Node::File { .. }) => Ok(()),
            Some(Node::Directory { .. }) => Err(FsError::AlreadyExists(format!(
                "cannot create file {}, a directory with this path already exists",
                path
            ))),
            None => {
                Self::require_parent_dir(&nodes, path)?;
                nodes.insert(
                    path.to_string(),
                    Node::File {
                        data: Vec::new(),
                        modified: SystemTime::now(),
                    },
                );
                Ok(())
            }
        }
    }

    fn create_directory(self: &Arc<Self>, path: &str) -> FsResult<DirRef> {
        self.check_access(path)?;
        {
            let mut nodes = self.write_nodes();
            match nodes.get(path) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(FsError::AlreadyExists(format!(
                        "cannot create directory {}, a regular file with this path already exists",
                        path
                    )));
                }
                None => {
                    Self::require_parent_dir(&nodes, path)?;
                    nodes.insert(
                        path.to_string(),
                        Node::Directory {
                            modified: SystemTime::now(),
                        },
                    );
                }
            }
        }
        Ok(Arc::new(MemoryDirectory {
            store: Arc::clone(self),
            path: path.to_string(),
        }))
    }

    fn delete(&self, path: &str) -> FsResult<()> {
        self.check_access(path)?;
        if path == "/" {
            return Err(FsError::NotSupported("cannot delete the root directory".into()));
        }
        let mut nodes = self.write_nodes();
        match nodes.get(path) {
            None => Err(not_found(path)),
            Some(Node::Directory { .. }) if Self::has_children(&nodes, path) => {
                Err(FsError::Io(io::Error::new(
                    io::ErrorKind::DirectoryNotEmpty,
                    format!("directory not empty: {}", path),
                )))
            }
            Some(_) => {
                nodes.remove(path);
                Ok(())
            }
        }
    }

    fn has_children(nodes: &BTreeMap<String, Node>, path: &str) -> bool {
        let prefix = child_prefix(path);
        nodes
            .range(prefix.clone()..)
            .find(|(key, _)| key.as_str() != path)
            .is_some_and(|(key, _)| key.starts_with(&prefix))
    }

    fn children(&self, path: &str) -> FsResult<Vec<(String, bool)>> {
        self.check_access(path)?;
        let nodes = self.read_nodes();
        match nodes.get(path) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => return Err(FsError::NotADirectory(path.to_string())),
            None => return Err(not_found(path)),
        }
        let prefix = child_prefix(path);
        Ok(nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter(|(key, _)| key.as_str() != path)
            .filter(|(key, _)| !key[prefix.len()..].contains('/'))
            .map(|(key, node)| (key.clone(), matches!(node, Node::Directory { .. })))
            .collect())
    }

    fn read(&self, path: &str) -> FsResult<Vec<u8>> {
        self.check_access(path)?;
        match self.read_nodes().get(path) {
            Some(Node::File { data, .. }) => Ok(data.clone()),
            Some(Node::Directory { .. }) => Err(FsError::NotSupported(format!(
                "cannot open input stream of directory {}",
                path
            ))),
            None => Err(not_found(path)),
        }
    }

    fn modified(&self, path: &str) -> FsResult<Option<SystemTime>> {
        self.check_access(path)?;
        match self.read_nodes().get(path) {
            Some(Node::File { modified, .. } | Node::Directory { modified }) => Ok(Some(*modified)),
            None => Err(not_found(path)),
        }
    }

    fn set_modified(&self, path: &str, time: SystemTime) -> FsResult<()> {
        self.check_access(path)?;
        match self.write_nodes().get_mut(path) {
            Some(Node::File { modified, .. } | Node::Directory { modified }) => {
                *modified = time;
                Ok(())
            }
            None => Err(not_found(path)),
        }
    }

    fn is_directory(&self, path: &str) -> bool {
        matches!(self.read_nodes().get(path), Some(Node::Directory { .. }))
    }
}

/// Render a store path as a `mem:` URI, percent-encoding each segment
fn path_to_uri(path: &str) -> String {
    let encoded: Vec<_> = path
        .split('/')
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!("{}:{}", MEMORY_SCHEME, encoded.join("/"))
}

fn name_of(path: &str) -> String {
    match path.rfind('/') {
        Some(i) if path.len() > 1 => path[i + 1..].to_string(),
        _ => String::from("/"),
    }
}

/// Output stream buffering in memory; committed to the store on flush and on
/// drop, whenever something was written since the last commit
struct MemoryWriter {
    store: Arc<MemoryStore>,
    path: String,
    buffer: Cursor<Vec<u8>>,
    dirty: bool,
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.buffer.write(buf)?;
        self.dirty |= n > 0;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.store
            .commit(&self.path, self.buffer.get_ref().clone())
            .map_err(|e| match e {
                FsError::Io(err) => err,
                other => io::Error::other(other.to_string()),
            })?;
        self.dirty = false;
        Ok(())
    }
}

impl Seek for MemoryWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buffer.seek(pos)
    }
}

impl Drop for MemoryWriter {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::debug!(path = %self.path, error = %e, "memory stream commit on drop failed");
        }
    }
}

macro_rules! memory_handle_common {
    () => {
        fn scheme(&self) -> &str {
            MEMORY_SCHEME
        }

        fn name(&self) -> String {
            name_of(&self.path)
        }

        fn path(&self) -> String {
            path_to_uri(&self.path)
        }

        fn parent(&self) -> Option<DirRef> {
            parent_path(&self.path).map(|p| {
                Arc::new(MemoryDirectory {
                    store: Arc::clone(&self.store),
                    path: p,
                }) as DirRef
            })
        }

        fn exists(&self) -> FsResult<bool> {
            self.store.exists(&self.path)
        }

        fn create_directory(&self) -> FsResult<DirRef> {
            self.store.create_directory(&self.path)
        }

        fn delete(&self) -> FsResult<()> {
            self.store.delete(&self.path)
        }

        fn modified(&self) -> FsResult<Option<SystemTime>> {
            self.store.modified(&self.path)
        }

        fn set_modified(&self, time: SystemTime) -> FsResult<()> {
            self.store.set_modified(&self.path, time)
        }
    };
}

/// A path in a [`MemoryStore`] with file semantics
#[derive(Debug, Clone)]
pub struct MemoryFile {
    store: Arc<MemoryStore>,
    path: String,
}

impl FileHandle for MemoryFile {
    memory_handle_common!();

    fn size(&self) -> FsResult<u64> {
        if self.store.is_directory(&self.path) {
            return MemoryDirectory {
                store: Arc::clone(&self.store),
                path: self.path.clone(),
            }
            .size();
        }
        self.store.file_size(&self.path)
    }

    fn create(&self) -> FsResult<()> {
        self.store.create_file(&self.path)
    }

    fn input_stream(&self) -> FsResult<InputStream> {
        let data = self.store.read(&self.path)?;
        Ok(Box::new(Cursor::new(data)))
    }

    fn output_stream(&self) -> FsResult<OutputStream> {
        if self.store.is_directory(&self.path) {
            return Err(FsError::NotSupported(format!(
                "cannot open output stream of directory {}",
                self.path
            )));
        }
        // Creates a missing file and truncates an existing one
        self.store.commit(&self.path, Vec::new())?;
        Ok(Box::new(MemoryWriter {
            store: Arc::clone(&self.store),
            path: self.path.clone(),
            buffer: Cursor::new(Vec::new()),
            dirty: false,
        }))
    }
}

/// A path in a [`MemoryStore`] with directory semantics
#[derive(Debug, Clone)]
pub struct MemoryDirectory {
    store: Arc<MemoryStore>,
    path: String,
}

impl FileHandle for MemoryDirectory {
    memory_handle_common!();

    fn size(&self) -> FsResult<u64> {
        directory_size(self)
    }

    fn create(&self) -> FsResult<()> {
        self.store.create_directory(&self.path).map(|_| ())
    }

    fn input_stream(&self) -> FsResult<InputStream> {
        Err(FsError::NotSupported(format!(
            "cannot open input stream of directory {}",
            self.path
        )))
    }

    fn output_stream(&self) -> FsResult<OutputStream> {
        Err(FsError::NotSupported(format!(
            "cannot open output stream of directory {}",
            self.path
        )))
    }

    fn is_directory(&self) -> bool {
        true
    }

    fn as_directory(self: Arc<Self>) -> Option<DirRef> {
        Some(self)
    }
}

impl DirectoryHandle for MemoryDirectory {
    fn files(&self) -> FsResult<Vec<FileRef>> {
        let children = self.store.children(&self.path)?;
        Ok(children
            .into_iter()
            .map(|(path, is_dir)| -> FileRef {
                let store = Arc::clone(&self.store);
                if is_dir {
                    Arc::new(MemoryDirectory { store, path })
                } else {
                    Arc::new(MemoryFile { store, path })
                }
            })
            .collect())
    }

    fn create_child(&self, name: &str) -> FsResult<FileRef> {
        validate_child_name(name)?;
        Ok(Arc::new(MemoryFile {
            store: Arc::clone(&self.store),
            path: join(&self.path, name),
        }))
    }

    fn into_file(self: Arc<Self>) -> FileRef {
        self
    }
}

/// Factory serving handles from one shared [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryBackend {
    info: BackendInfo,
    store: Arc<MemoryStore>,
}

impl MemoryBackend {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            info: BackendInfo::new("Memory", MEMORY_SCHEME)
                .with_description("In-memory scratch storage"),
            store,
        }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

impl BackendFactory for MemoryBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn new_instance(&self, uri: &Url) -> FsResult<FileRef> {
        let decoded = urlencoding::decode(uri.path())
            .map_err(|e| FsError::MalformedUri(format!("{}: {}", uri, e)))?;
        Ok(self.store.handle(&decoded))
    }
}
