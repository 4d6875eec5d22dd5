//! Built-in commands and their shared streaming helpers

pub mod copy;
pub mod mkdir;
pub mod size;
pub mod zip;

pub use copy::Copy;
pub use mkdir::NewDirectory;
pub use size::{CalculateSize, SizeResult};
pub use zip::ZipCompression;

use std::io::{ErrorKind, Read, Write};

use twincom_plugin_api::{validate_child_name, FileHandle, FileRef, FsResult};

use crate::command::{Handler, Reporter};
use crate::engine::CommandRegistry;
use crate::errors::CommandError;

/// Registered type names of the built-in commands
pub const COPY: &str = "Copy";
pub const ZIP: &str = "ZipCompression";
pub const CALCULATE_SIZE: &str = "CalculateSize";
pub const NEW_DIRECTORY: &str = "NewDirectory";

/// Chunk size used when streaming file content
pub const BUFFER_SIZE: usize = 8192;

pub const DEFAULT_ARCHIVE_NAME: &str = "compressed.zip";

/// Register every built-in command; archives are written as `archive_name`
pub fn register_builtin(registry: &mut CommandRegistry, archive_name: &str) {
    registry.register(COPY, || Ok(Handler::long(Copy::new())));
    let archive_name = archive_name.to_string();
    registry.register(ZIP, move || {
        validate_child_name(&archive_name)?;
        Ok(Handler::long(ZipCompression::with_name(archive_name.clone())))
    });
    registry.register(CALCULATE_SIZE, || Ok(Handler::long(CalculateSize::new())));
    registry.register(NEW_DIRECTORY, || Ok(Handler::immediate(NewDirectory::new())));
}

/// Total bytes of a set of sources, for progress tracking.
/// Fails as a whole on the first error.
pub fn total_size(sources: &[FileRef]) -> FsResult<u64> {
    let mut total = 0u64;
    for source in sources {
        total = total.saturating_add(source.size()?);
    }
    Ok(total)
}

/// `round(100 * done / total)`, with an empty job counting as complete
pub fn percent(done: u64, total: u64) -> i32 {
    if total == 0 {
        return 100;
    }
    let scaled = (u128::from(done) * 100 + u128::from(total) / 2) / u128::from(total);
    scaled.min(100) as i32
}

/// True if `inner` is `outer` or lies below it
pub(crate) fn is_within(inner: &dyn FileHandle, outer: &dyn FileHandle) -> bool {
    let inner = inner.key();
    let outer = outer.key();
    if inner.scheme != outer.scheme {
        return false;
    }
    let prefix = outer.path.trim_end_matches('/');
    inner.path == outer.path
        || inner
            .path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Stream `reader` into `writer` in [`BUFFER_SIZE`] chunks.
///
/// Cancellation is checked before every write; `on_chunk` receives the size
/// of each chunk written. Returns the number of bytes copied.
pub(crate) fn pump(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    progress: &Reporter,
    on_chunk: &mut dyn FnMut(u64),
) -> Result<u64, CommandError> {
    let mut buf = [0u8; BUFFER_SIZE];
    let mut copied = 0u64;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if progress.is_canceled() {
            return Err(CommandError::Canceled);
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
        on_chunk(n as u64);
    }

    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryStore;

    #[test]
    fn test_percent_rounds() {
        assert_eq!(percent(0, 60), 0);
        assert_eq!(percent(10, 60), 17);
        assert_eq!(percent(30, 60), 50);
        assert_eq!(percent(60, 60), 100);
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn test_total_size() {
        let store = MemoryStore::new();
        store.write_file("/a", vec![0u8; 10]).unwrap();
        store.write_file("/d/b", vec![0u8; 20]).unwrap();
        let sources = vec![store.handle("/a"), store.handle("/d")];
        assert_eq!(total_size(&sources).unwrap(), 30);

        store.deny("/d");
        assert!(total_size(&sources).is_err());
    }

    #[test]
    fn test_is_within() {
        let store = MemoryStore::new();
        let dir = store.handle("/src");
        assert!(is_within(store.handle("/src").as_ref(), dir.as_ref()));
        assert!(is_within(store.handle("/src/deep/x").as_ref(), dir.as_ref()));
        assert!(!is_within(store.handle("/srcfoo").as_ref(), dir.as_ref()));
        assert!(is_within(store.handle("/anything").as_ref(), store.root().into_file().as_ref()));
    }

    #[test]
    fn test_register_builtin() {
        let mut registry = CommandRegistry::new();
        register_builtin(&mut registry, DEFAULT_ARCHIVE_NAME);
        assert_eq!(
            registry.type_names(),
            vec![CALCULATE_SIZE, COPY, NEW_DIRECTORY, ZIP]
        );
        assert!(registry.create(COPY).unwrap().is_long());
        assert!(!registry.create(NEW_DIRECTORY).unwrap().is_long());
    }

    #[test]
    fn test_invalid_archive_name_fails_instantiation() {
        let mut registry = CommandRegistry::new();
        register_builtin(&mut registry, "../escape.zip");
        assert!(registry.create(ZIP).is_err());
    }
}
