//! New directory command

use std::collections::HashSet;

use twincom_plugin_api::{DirectoryHandle, FileHandle, FsResult};

use crate::command::{Command, Context};
use crate::errors::CommandError;

pub const DEFAULT_DIRECTORY_NAME: &str = "New Folder";

/// First free name among `base`, `base (2)`, `base (3)`, ...
pub fn unique_name(dir: &dyn DirectoryHandle, base: &str) -> FsResult<String> {
    let taken: HashSet<String> = dir.files()?.iter().map(|f| f.name()).collect();
    if !taken.contains(base) {
        return Ok(base.to_string());
    }
    let mut n = 2u32;
    loop {
        let candidate = format!("{} ({})", base, n);
        if !taken.contains(&candidate) {
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Creates a uniquely named directory in the active panel's directory
#[derive(Debug)]
pub struct NewDirectory {
    base_name: String,
}

impl Default for NewDirectory {
    fn default() -> Self {
        Self::with_name(DEFAULT_DIRECTORY_NAME)
    }
}

impl NewDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }
}

impl Command for NewDirectory {
    fn name(&self) -> &str {
        "New folder"
    }

    fn execute(&mut self, active: &Context, _inactive: &Context) -> Result<(), CommandError> {
        let dir = active.current_directory();
        let name = unique_name(dir.as_ref(), &self.base_name)?;
        let created = dir.create_child(&name)?.create_directory()?;
        tracing::debug!(path = %created.path(), "directory created");
        Ok(())
    }
}
