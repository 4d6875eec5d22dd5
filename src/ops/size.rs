//! Background size calculation

use std::sync::{Arc, Mutex, PoisonError};

use twincom_plugin_api::FileRef;

use crate::command::{Context, LongCommand, Reporter, INDETERMINATE};
use crate::errors::CommandError;

/// Slot receiving the computed size, readable from any thread
#[derive(Debug, Clone, Default)]
pub struct SizeResult(Arc<Mutex<Option<u64>>>);

impl SizeResult {
    pub fn get(&self) -> Option<u64> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, size: u64) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(size);
    }
}

/// Computes the recursive size of one handle on a worker.
///
/// Without an explicit target, measures the active panel's first selected
/// file, or its current directory when nothing is selected.
#[derive(Debug, Default)]
pub struct CalculateSize {
    target: Option<FileRef>,
    result: SizeResult,
}

impl CalculateSize {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_target(target: FileRef) -> Self {
        Self {
            target: Some(target),
            result: SizeResult::default(),
        }
    }

    /// Where the size lands once the task has finished
    pub fn result(&self) -> SizeResult {
        self.result.clone()
    }

    fn measure(&self, progress: &Reporter, file: &FileRef) -> Result<u64, CommandError> {
        if progress.is_canceled() {
            return Err(CommandError::Canceled);
        }
        match Arc::clone(file).as_directory() {
            Some(dir) => {
                let mut total = 0u64;
                for child in dir.files()? {
                    total = total.saturating_add(self.measure(progress, &child)?);
                }
                Ok(total)
            }
            None => Ok(file.size()?),
        }
    }
}

impl LongCommand for CalculateSize {
    fn name(&self) -> &str {
        "Calculate size"
    }

    fn run(&mut self, progress: &Reporter, active: &Context, _inactive: &Context) {
        let target = match &self.target {
            Some(target) => Arc::clone(target),
            None => match active.first_selected_file() {
                Some(file) => Arc::clone(file),
                None => Arc::clone(active.current_directory()).into_file(),
            },
        };

        progress.set_description(format!("Calculating size of {}", target.name()));
        progress.set_progress(INDETERMINATE);
        match self.measure(progress, &target) {
            Ok(size) => {
                self.result.set(size);
                progress.set_progress(100);
                progress.finished();
            }
            Err(e) => progress.failed(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{LongTask, Phase};
    use crate::providers::memory::MemoryStore;

    #[test]
    fn test_measures_selection_or_directory() {
        let store = MemoryStore::new();
        store.write_file("/a/x", vec![1u8; 7]).unwrap();
        store.write_file("/a/b/y", vec![1u8; 5]).unwrap();
        store.write_file("/z", vec![1u8; 100]).unwrap();

        let command = CalculateSize::new();
        let result = command.result();
        let task = LongTask::new(command);
        let active = Context::new(store.root()).with_selection(vec![store.handle("/a")]);
        task.run_blocking(&active, &active.clone());
        assert_eq!(result.get(), Some(12));

        let command = CalculateSize::new();
        let result = command.result();
        let active = Context::new(store.root());
        LongTask::new(command).run_blocking(&active, &active.clone());
        assert_eq!(result.get(), Some(112));
    }

    #[test]
    fn test_access_failure_leaves_no_result() {
        let store = MemoryStore::new();
        store.write_file("/locked/x", "1").unwrap();
        store.deny("/locked");

        let command = CalculateSize::for_target(store.root().into_file());
        let result = command.result();
        let task = LongTask::new(command);
        let handle = task.handle();
        let active = Context::new(store.root());
        task.run_blocking(&active, &active.clone());

        assert_eq!(handle.phase(), Phase::Failed);
        assert_eq!(result.get(), None);
    }
}
