//! Recursive copy from the active panel's selection into the inactive panel

use std::io::Write;
use std::sync::Arc;

use twincom_plugin_api::{DirRef, FileHandle, FileRef};

use super::{is_within, percent, pump, total_size};
use crate::command::{Context, LongCommand, Reporter};
use crate::errors::CommandError;

/// Copies the selected files and directories, depth-first.
#[derive(Debug, Default)]
pub struct Copy {
    copied: u64,
    total: u64,
}

impl Copy {
    pub fn new() -> Self {
        Self::default()
    }

    fn copy_all(
        &mut self,
        progress: &Reporter,
        sources: &[FileRef],
        target: &DirRef,
    ) -> Result<(), CommandError> {
        self.total = total_size(sources)?;
        self.copied = 0;

        let target_file = Arc::clone(target).into_file();
        for source in sources {
            if source.is_directory() && is_within(target_file.as_ref(), source.as_ref()) {
                return Err(CommandError::Other(format!(
                    "Cannot copy {} into itself",
                    source.name()
                )));
            }
            self.copy_recursively(progress, source, target)?;
        }
        Ok(())
    }

    fn copy_recursively(
        &mut self,
        progress: &Reporter,
        source: &FileRef,
        target: &DirRef,
    ) -> Result<(), CommandError> {
        if progress.is_canceled() {
            return Err(CommandError::Canceled);
        }
        let dest = target.create_child(&source.name())?;

        match Arc::clone(source).as_directory() {
            Some(dir) => {
                let dest_dir = dest.create_directory()?;
                for child in dir.files()? {
                    self.copy_recursively(progress, &child, &dest_dir)?;
                }
                // After the children, so creating them does not bump the time
                preserve_modified(source.as_ref(), dest.as_ref());
            }
            None => self.copy_file(progress, source, &dest)?,
        }
        Ok(())
    }

    fn copy_file(
        &mut self,
        progress: &Reporter,
        source: &FileRef,
        dest: &FileRef,
    ) -> Result<(), CommandError> {
        if **source == **dest {
            return Err(CommandError::Other(format!(
                "Cannot copy {} onto itself",
                source.name()
            )));
        }
        progress.set_description(format!("Copying {}", source.name()));

        let mut input = source.input_stream()?;
        let mut output = dest.output_stream()?;

        let total = self.total;
        let copied = &mut self.copied;
        let result = pump(&mut input, &mut output, progress, &mut |n| {
            *copied += n;
            progress.set_progress(percent(*copied, total));
        })
        .and_then(|_| output.flush().map_err(CommandError::from));
        drop(output);

        if let Err(e) = result {
            // Clean up partial file
            if let Err(cleanup) = dest.delete() {
                tracing::debug!(path = %dest.path(), error = %cleanup, "could not remove partial copy");
            }
            return Err(e);
        }
        preserve_modified(source.as_ref(), dest.as_ref());
        Ok(())
    }
}

/// Best-effort: the data is already written, so failures are ignored
fn preserve_modified(source: &dyn FileHandle, dest: &dyn FileHandle) {
    if let Ok(Some(time)) = source.modified() {
        let _ = dest.set_modified(time);
    }
}

impl LongCommand for Copy {
    fn name(&self) -> &str {
        "Copy"
    }

    fn description(&self) -> String {
        "Copying...".to_string()
    }

    fn run(&mut self, progress: &Reporter, active: &Context, inactive: &Context) {
        match self.copy_all(
            progress,
            active.selected_files(),
            inactive.current_directory(),
        ) {
            Ok(()) => {
                progress.set_progress(100);
                progress.finished();
            }
            Err(e) => progress.failed(e),
        }
    }
}
