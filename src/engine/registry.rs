//! Construct-by-type-name factory map

use std::collections::HashMap;
use std::error::Error;

use crate::command::Handler;
use crate::errors::{EngineError, EngineResult};

pub type BoxError = Box<dyn Error + Send + Sync>;

type Constructor = Box<dyn Fn() -> Result<Handler, BoxError> + Send + Sync>;

/// Zero-argument constructors keyed by handler type name, filled at startup
#[derive(Default)]
pub struct CommandRegistry {
    constructors: HashMap<String, Constructor>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for the name
    pub fn register<F>(&mut self, type_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<Handler, BoxError> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        tracing::debug!(%type_name, "command type registered");
        self.constructors.insert(type_name, Box::new(constructor));
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    /// Registered type names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Create a fresh handler. Every failure, an unknown name included, is an
    /// instantiation error.
    pub fn create(&self, type_name: &str) -> EngineResult<Handler> {
        let constructor =
            self.constructors
                .get(type_name)
                .ok_or_else(|| EngineError::Instantiation {
                    type_name: type_name.to_string(),
                    source: "unknown command type".into(),
                })?;
        constructor().map_err(|source| EngineError::Instantiation {
            type_name: type_name.to_string(),
            source,
        })
    }
}

impl std::fmt::Debug for CommandRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}
