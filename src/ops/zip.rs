//! Recursive ZIP compression of the active panel's selection

use std::io::Write;
use std::sync::Arc;

use twincom_plugin_api::{FileHandle, FileRef, HandleKey, OutputStream};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::{percent, pump, total_size, DEFAULT_ARCHIVE_NAME};
use crate::command::{Context, LongCommand, Reporter};
use crate::errors::CommandError;

/// Packs the selection into an archive in the active panel's directory.
///
/// Entry names are relative to that directory; directories get their own
/// entries so empty ones survive.
#[derive(Debug)]
pub struct ZipCompression {
    archive_name: String,
    copied: u64,
    total: u64,
}

impl Default for ZipCompression {
    fn default() -> Self {
        Self::with_name(DEFAULT_ARCHIVE_NAME)
    }
}

impl ZipCompression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(archive_name: impl Into<String>) -> Self {
        Self {
            archive_name: archive_name.into(),
            copied: 0,
            total: 0,
        }
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    fn compress(&mut self, progress: &Reporter, active: &Context) -> Result<(), CommandError> {
        let archive = active.current_directory().create_child(&self.archive_name)?;
        let archive_key = archive.key();

        // Never pack the archive into itself
        let sources: Vec<FileRef> = active
            .selected_files()
            .iter()
            .filter(|f| f.key() != archive_key)
            .cloned()
            .collect();
        self.total = total_size(&sources)?;
        self.copied = 0;

        let mut writer = ZipWriter::new(archive.output_stream()?);
        let result = self.write_entries(progress, &mut writer, &sources, &archive_key);

        // Close on every path; the first error wins
        let closed = writer
            .finish()
            .map_err(CommandError::from)
            .and_then(|mut out| out.flush().map_err(CommandError::from));
        let error = match (result, closed) {
            (Ok(()), Ok(())) => return Ok(()),
            (Err(e), Err(close_error)) => {
                tracing::warn!(archive = %archive.path(), error = %close_error, "closing archive failed");
                e
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => e,
        };

        // Remove the incomplete archive
        if let Err(cleanup) = archive.delete() {
            tracing::warn!(archive = %archive.path(), error = %cleanup, "could not remove incomplete archive");
        }
        Err(error)
    }

    fn write_entries(
        &mut self,
        progress: &Reporter,
        writer: &mut ZipWriter<OutputStream>,
        sources: &[FileRef],
        archive_key: &HandleKey,
    ) -> Result<(), CommandError> {
        for source in sources {
            self.add_entry(progress, writer, source, "", archive_key)?;
        }
        Ok(())
    }

    fn add_entry(
        &mut self,
        progress: &Reporter,
        writer: &mut ZipWriter<OutputStream>,
        file: &FileRef,
        prefix: &str,
        archive_key: &HandleKey,
    ) -> Result<(), CommandError> {
        if progress.is_canceled() {
            return Err(CommandError::Canceled);
        }
        if file.key() == *archive_key {
            return Ok(());
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let name = format!("{}{}", prefix, file.name());

        match Arc::clone(file).as_directory() {
            Some(dir) => {
                let dir_prefix = format!("{}/", name);
                writer.add_directory(dir_prefix.clone(), options)?;
                for child in dir.files()? {
                    self.add_entry(progress, writer, &child, &dir_prefix, archive_key)?;
                }
            }
            None => {
                progress.set_description(format!("Zipping {}", file.name()));
                writer.start_file(name, options)?;
                let mut input = file.input_stream()?;

                let total = self.total;
                let copied = &mut self.copied;
                pump(&mut input, &mut *writer, progress, &mut |n| {
                    *copied += n;
                    progress.set_progress(percent(*copied, total));
                })?;
            }
        }
        Ok(())
    }
}

impl LongCommand for ZipCompression {
    fn name(&self) -> &str {
        "Compress"
    }

    fn description(&self) -> String {
        "Compressing...".to_string()
    }

    fn run(&mut self, progress: &Reporter, active: &Context, _inactive: &Context) {
        match self.compress(progress, active) {
            Ok(()) => {
                progress.set_progress(100);
                progress.finished();
            }
            Err(e) => progress.failed(e),
        }
    }
}
