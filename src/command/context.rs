//! Read-only panel snapshot handed to commands

use twincom_plugin_api::{DirRef, FileRef};

/// A panel's directory, visible files and selection, captured at dispatch time
#[derive(Debug, Clone)]
pub struct Context {
    current_directory: DirRef,
    files: Vec<FileRef>,
    selected: Vec<FileRef>,
}

impl Context {
    /// Context of a panel showing `current_directory` with nothing listed
    pub fn new(current_directory: DirRef) -> Self {
        Self {
            current_directory,
            files: Vec::new(),
            selected: Vec::new(),
        }
    }

    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    /// Set the selection, in selection order
    pub fn with_selection(mut self, selected: Vec<FileRef>) -> Self {
        self.selected = selected;
        self
    }

    pub fn current_directory(&self) -> &DirRef {
        &self.current_directory
    }

    /// All files visible in the panel
    pub fn files(&self) -> &[FileRef] {
        &self.files
    }

    pub fn selected_files(&self) -> &[FileRef] {
        &self.selected
    }

    pub fn first_selected_file(&self) -> Option<&FileRef> {
        self.selected.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::memory::MemoryStore;

    #[test]
    fn test_selection_order_is_kept() {
        let store = MemoryStore::new();
        let root = store.root();
        let b = root.create_child("b").unwrap();
        let a = root.create_child("a").unwrap();

        let ctx = Context::new(root.clone())
            .with_files(vec![a.clone(), b.clone()])
            .with_selection(vec![b.clone(), a.clone()]);

        assert_eq!(ctx.files().len(), 2);
        assert!(**ctx.first_selected_file().unwrap() == *b);
        assert!(*ctx.selected_files()[1] == *a);
        assert!(**ctx.current_directory() == *root);
    }

    #[test]
    fn test_empty_selection() {
        let store = MemoryStore::new();
        let ctx = Context::new(store.root());
        assert!(ctx.first_selected_file().is_none());
        assert!(ctx.selected_files().is_empty());
    }
}
