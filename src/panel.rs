//! Panel model: one side of the two-panel view
//!
//! Rows are the parent directory (shown as `..`) when there is one, then
//! directories, then files, each group sorted by name.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use twincom_plugin_api::{DirRef, FileHandle, FileRef, FsResult, HandleKey};

use crate::command::{
    Context, FailureListener, Handler, LongTask, ProgressEvent, ProgressListener, TaskHandle,
};
use crate::engine::CommandExecutor;
use crate::errors::{CommandError, EngineResult};
use crate::ops::{CalculateSize, SizeResult};

/// Extension: the word characters after the last dot
static EXTENSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(\w*)$").expect("valid extension regex"));

pub const PARENT_NAME: &str = "..";

type SizeCache = Arc<Mutex<HashMap<HandleKey, u64>>>;

/// Type column label: `<dir>`, the extension, or `-` without one
pub fn type_label(file: &dyn FileHandle) -> String {
    if file.is_directory() {
        return "<dir>".to_string();
    }
    let name = file.name();
    match EXTENSION_RE.captures(&name).and_then(|c| c.get(1)) {
        Some(ext) => ext.as_str().to_string(),
        None => "-".to_string(),
    }
}

pub struct Panel {
    directory: DirRef,
    parent: Option<DirRef>,
    entries: Vec<FileRef>,
    cursor: usize,
    /// Selected entries, in selection order
    selection: Vec<HandleKey>,
    size_cache: SizeCache,
    /// Bumped whenever the listing changes, so stale size results are dropped
    generation: Arc<AtomicU64>,
}

impl Panel {
    /// Open a panel on `directory`
    pub fn open(directory: DirRef) -> FsResult<Self> {
        let mut panel = Self {
            parent: directory.parent(),
            directory,
            entries: Vec::new(),
            cursor: 0,
            selection: Vec::new(),
            size_cache: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        };
        panel.refresh()?;
        Ok(panel)
    }

    pub fn directory(&self) -> &DirRef {
        &self.directory
    }

    /// Re-read the directory. Cached directory sizes are dropped.
    pub fn refresh(&mut self) -> FsResult<()> {
        let mut entries = self.directory.files()?;
        entries.sort_by(|a, b| {
            b.is_directory()
                .cmp(&a.is_directory())
                .then_with(|| a.name().to_lowercase().cmp(&b.name().to_lowercase()))
                .then_with(|| a.name().cmp(&b.name()))
        });
        self.entries = entries;
        self.parent = self.directory.parent();

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.size_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let present: Vec<HandleKey> = self.entries.iter().map(|e| e.key()).collect();
        self.selection.retain(|key| present.contains(key));
        self.cursor = self.cursor.min(self.len().saturating_sub(1));
        Ok(())
    }

    /// Change directory; the selection is cleared
    pub fn set_directory(&mut self, directory: DirRef) -> FsResult<()> {
        let previous = std::mem::replace(&mut self.directory, directory);
        self.selection.clear();
        self.cursor = 0;
        if let Err(e) = self.refresh() {
            self.directory = previous;
            self.refresh()?;
            return Err(e);
        }
        Ok(())
    }

    /// Number of rows, parent included
    pub fn len(&self) -> usize {
        self.entries.len() + usize::from(self.parent.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listed entries, without the parent row
    pub fn files(&self) -> &[FileRef] {
        &self.entries
    }

    fn is_parent_row(&self, row: usize) -> bool {
        self.parent.is_some() && row == 0
    }

    /// Handle shown at `row`
    pub fn row(&self, row: usize) -> Option<FileRef> {
        match &self.parent {
            Some(parent) if row == 0 => Some(Arc::clone(parent).into_file()),
            Some(_) => self.entries.get(row - 1).cloned(),
            None => self.entries.get(row).cloned(),
        }
    }

    /// Name column: `..` for the parent row
    pub fn display_name(&self, row: usize) -> Option<String> {
        if self.is_parent_row(row) {
            return Some(PARENT_NAME.to_string());
        }
        self.row(row).map(|f| f.name())
    }

    /// Size column. Directories show their calculated size or 0; errors show 0.
    pub fn size(&self, file: &dyn FileHandle) -> u64 {
        if file.is_directory() {
            return self
                .size_cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&file.key())
                .copied()
                .unwrap_or(0);
        }
        file.size().unwrap_or(0)
    }

    /// Calculated size of a directory, if known
    pub fn cached_size(&self, file: &dyn FileHandle) -> Option<u64> {
        self.size_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&file.key())
            .copied()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, row: usize) {
        self.cursor = row.min(self.len().saturating_sub(1));
    }

    /// Toggle selection of `row`; the parent row cannot be selected
    pub fn toggle_selection(&mut self, row: usize) -> bool {
        if self.is_parent_row(row) {
            return false;
        }
        let Some(file) = self.row(row) else {
            return false;
        };
        let key = file.key();
        match self.selection.iter().position(|k| *k == key) {
            Some(i) => {
                self.selection.remove(i);
            }
            None => self.selection.push(key),
        }
        true
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    /// Selected files in selection order, or the file under the cursor when
    /// nothing is selected
    pub fn selected_files(&self) -> Vec<FileRef> {
        if self.selection.is_empty() {
            if self.is_parent_row(self.cursor) {
                return Vec::new();
            }
            return self.row(self.cursor).into_iter().collect();
        }
        self.selection
            .iter()
            .filter_map(|key| self.entries.iter().find(|e| e.key() == *key).cloned())
            .collect()
    }

    /// Enter the directory under the cursor. Returns false if it is a file.
    pub fn enter(&mut self) -> FsResult<bool> {
        let Some(target) = self.row(self.cursor).and_then(|f| f.as_directory()) else {
            return Ok(false);
        };
        let coming_from = self.directory.key();
        let going_up = self.is_parent_row(self.cursor);
        self.set_directory(target)?;
        if going_up {
            self.focus(&coming_from);
        }
        Ok(true)
    }

    /// Go to the parent directory, keeping the cursor on where we came from
    pub fn go_up(&mut self) -> FsResult<bool> {
        let Some(parent) = self.parent.clone() else {
            return Ok(false);
        };
        let coming_from = self.directory.key();
        self.set_directory(parent)?;
        self.focus(&coming_from);
        Ok(true)
    }

    fn focus(&mut self, key: &HandleKey) {
        let offset = usize::from(self.parent.is_some());
        if let Some(i) = self.entries.iter().position(|e| e.key() == *key) {
            self.cursor = i + offset;
        }
    }

    /// Snapshot handed to commands
    pub fn context(&self) -> Context {
        Context::new(Arc::clone(&self.directory))
            .with_files(self.entries.clone())
            .with_selection(self.selected_files())
    }

    /// Start computing the size of the directory at `row` in the background.
    ///
    /// The result lands in the size cache on the presentation thread, unless
    /// the listing changed in the meantime. Returns `None` for file rows.
    pub fn calculate_size(
        &self,
        engine: &CommandExecutor,
        row: usize,
        on_failure: Option<Box<dyn FailureListener>>,
    ) -> EngineResult<Option<TaskHandle>> {
        let Some(file) = self.row(row).filter(|f| f.is_directory()) else {
            return Ok(None);
        };

        let command = CalculateSize::for_target(Arc::clone(&file));
        let listener = SizeListener {
            key: file.key(),
            result: command.result(),
            cache: Arc::clone(&self.size_cache),
            started: self.generation.load(Ordering::SeqCst),
            generation: Arc::clone(&self.generation),
            on_failure,
        };
        let task = LongTask::new(command);
        let handle = task.handle();
        engine.execute(
            Handler::Long(task),
            self.context(),
            self.context(),
            Some(Box::new(listener)),
        )?;
        Ok(Some(handle))
    }
}

impl std::fmt::Debug for Panel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Panel")
            .field("directory", &self.directory.path())
            .field("entries", &self.entries.len())
            .field("cursor", &self.cursor)
            .finish()
    }
}

/// Moves a finished size calculation into the panel's cache
struct SizeListener {
    key: HandleKey,
    result: SizeResult,
    cache: SizeCache,
    started: u64,
    generation: Arc<AtomicU64>,
    on_failure: Option<Box<dyn FailureListener>>,
}

impl FailureListener for SizeListener {
    fn failed(&mut self, source: &TaskHandle, cause: &CommandError) {
        if let Some(listener) = self.on_failure.as_mut() {
            listener.failed(source, cause);
        }
    }
}

impl ProgressListener for SizeListener {
    fn progress_changed(&mut self, _source: &TaskHandle, _event: &ProgressEvent) {}

    fn finished(&mut self, _source: &TaskHandle) {
        if self.generation.load(Ordering::SeqCst) != self.started {
            tracing::debug!(path = %self.key.path, "stale size result dropped");
            return;
        }
        if let Some(size) = self.result.get() {
            self.cache
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(self.key.clone(), size);
        }
    }
}
