//! Storage backends and the registry resolving them by URI scheme
//!
//! Backends abstract file system access, allowing commands to work with:
//! - Local filesystems (`file:`)
//! - In-memory scratch storage (`mem:`)
//! - Any other [`BackendFactory`] handed to the registry at startup

pub mod local;
pub mod memory;

pub use local::{LocalBackend, LocalDirectory, LocalFile, LOCAL_SCHEME};
pub use memory::{MemoryBackend, MemoryStore, MEMORY_SCHEME};

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, RwLock};

use regex::Regex;
use twincom_plugin_api::{BackendFactory, DirRef, FileRef, FsError, FsResult};
use url::Url;

/// RFC 3986 scheme prefix
static SCHEME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*):").expect("valid scheme regex"));

type Discovery = Box<dyn Iterator<Item = Arc<dyn BackendFactory>> + Send>;

/// Backends shipped with the application, in discovery order
pub fn installed_backends() -> Vec<Arc<dyn BackendFactory>> {
    vec![
        Arc::new(LocalBackend::new()),
        Arc::new(MemoryBackend::new(MemoryStore::new())),
    ]
}

/// Map a missing, empty or single-letter scheme (a drive letter) to `file`
pub fn ensure_scheme(scheme: Option<&str>) -> String {
    match scheme {
        Some(s) if s.chars().count() > 1 => s.to_ascii_lowercase(),
        _ => LOCAL_SCHEME.to_string(),
    }
}

/// Parse a URI or a bare native path into a URL
pub fn parse_location(location: &str) -> FsResult<Url> {
    let scheme = SCHEME_RE
        .captures(location)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str());

    // No scheme, or a drive letter: a native path
    if scheme.is_none_or(|s| s.len() == 1) {
        let path = std::path::absolute(location)
            .map_err(|e| FsError::MalformedUri(format!("{}: {}", location, e)))?;
        return Url::from_file_path(&path)
            .map_err(|()| FsError::MalformedUri(format!("{}: not an absolute path", location)));
    }

    Url::parse(location).map_err(|e| FsError::MalformedUri(format!("{}: {}", location, e)))
}

/// Scheme -> backend map, filled lazily from a one-pass discovery cursor.
///
/// Resolved schemes stay cached for the registry's lifetime. An unknown
/// scheme advances the shared cursor from where the previous lookup stopped;
/// discovery never restarts.
pub struct ProviderRegistry {
    cache: RwLock<HashMap<String, Arc<dyn BackendFactory>>>,
    cursor: Mutex<Discovery>,
}

impl ProviderRegistry {
    pub fn new<I>(backends: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn BackendFactory>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            cache: RwLock::new(HashMap::new()),
            cursor: Mutex::new(Box::new(backends.into_iter())),
        }
    }

    /// Registry over [`installed_backends`]
    pub fn installed() -> Self {
        Self::new(installed_backends())
    }

    fn cached(&self, scheme: &str) -> Option<Arc<dyn BackendFactory>> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(scheme)
            .cloned()
    }

    /// Backend for `scheme`
    pub fn resolve(&self, scheme: &str) -> FsResult<Arc<dyn BackendFactory>> {
        let scheme = ensure_scheme(Some(scheme));
        if let Some(factory) = self.cached(&scheme) {
            return Ok(factory);
        }

        let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have found it while we waited for the cursor
        if let Some(factory) = self.cached(&scheme) {
            return Ok(factory);
        }

        for factory in cursor.by_ref() {
            let found = factory.scheme().eq_ignore_ascii_case(&scheme);
            let declared = factory.scheme().to_ascii_lowercase();
            tracing::debug!(scheme = %declared, backend = %factory.info().name, "backend discovered");
            let cached = Arc::clone(
                self.cache
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(declared)
                    .or_insert(factory),
            );
            if found {
                return Ok(cached);
            }
        }

        Err(FsError::NoProvider(scheme))
    }

    /// Handle for a URI or native path
    pub fn get_element(&self, location: &str) -> FsResult<FileRef> {
        let url = parse_location(location)?;
        self.get_url(&url)
    }

    /// Handle for a parsed URL
    pub fn get_url(&self, url: &Url) -> FsResult<FileRef> {
        self.resolve(url.scheme())?.new_instance(url)
    }

    /// Directory handle for a URI or native path
    pub fn get_directory(&self, location: &str) -> FsResult<DirRef> {
        self.get_element(location)?
            .as_directory()
            .ok_or_else(|| FsError::NotADirectory(location.to_string()))
    }

    /// Schemes resolved so far, sorted
    pub fn known_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<_> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        schemes.sort();
        schemes
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("schemes", &self.known_schemes())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use twincom_plugin_api::FileHandle;

    fn counting(counter: &Arc<AtomicUsize>) -> ProviderRegistry {
        let counter = Arc::clone(counter);
        ProviderRegistry::new(installed_backends().into_iter().inspect(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_ensure_scheme() {
        assert_eq!(ensure_scheme(None), "file");
        assert_eq!(ensure_scheme(Some("")), "file");
        assert_eq!(ensure_scheme(Some("C")), "file");
        assert_eq!(ensure_scheme(Some("MEM")), "mem");
    }

    #[test]
    fn test_resolve_caches_without_rediscovery() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let registry = counting(&pulled);

        let first = registry.resolve("file").unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
        let second = registry.resolve("file").unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.known_schemes(), vec!["file"]);
    }

    #[test]
    fn test_cursor_resumes_where_it_stopped() {
        let pulled = Arc::new(AtomicUsize::new(0));
        let registry = counting(&pulled);

        registry.resolve("mem").unwrap();
        // "file" came first, so it was cached on the way
        assert_eq!(registry.known_schemes(), vec!["file", "mem"]);
        assert_eq!(pulled.load(Ordering::SeqCst), 2);

        registry.resolve("file").unwrap();
        assert_eq!(pulled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_scheme() {
        let registry = ProviderRegistry::installed();
        let Err(err) = registry.resolve("ftp") else {
            panic!("ftp should not resolve");
        };
        assert!(matches!(err, FsError::NoProvider(ref s) if s == "ftp"));
        // Exhausting the cursor still cached everything it passed
        assert_eq!(registry.known_schemes(), vec!["file", "mem"]);
        assert!(registry.resolve("ftp").is_err());
    }

    #[test]
    fn test_get_element_for_native_path() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = ProviderRegistry::installed();

        let dir = registry.get_directory(&tmp.path().to_string_lossy()).unwrap();
        assert_eq!(dir.scheme(), "file");

        let missing = tmp.path().join("later.txt");
        let element = registry.get_element(&missing.to_string_lossy()).unwrap();
        assert!(!element.is_directory());
        assert!(!element.exists().unwrap());
    }

    #[test]
    fn test_get_element_for_uri() {
        let registry = ProviderRegistry::installed();
        let root = registry.get_directory("mem:/").unwrap();
        assert_eq!(root.scheme(), "mem");

        let file = registry.get_element("mem:/notes.txt").unwrap();
        assert!(matches!(
            registry.get_directory("mem:/notes.txt"),
            Err(FsError::NotADirectory(_))
        ));
        assert!(!file.exists().unwrap());
    }

    #[test]
    fn test_malformed_uri() {
        let registry = ProviderRegistry::installed();
        assert!(matches!(
            registry.get_element("http://[::1"),
            Err(FsError::MalformedUri(_))
        ));
    }
}
