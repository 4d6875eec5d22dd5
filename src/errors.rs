use thiserror::Error;
use twincom_plugin_api::FsError;

/// Reason a long-running command ended in `failed`.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Operation canceled")]
    Canceled,

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error("Command panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl CommandError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, CommandError::Canceled)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(err: std::io::Error) -> Self {
        CommandError::Fs(FsError::from(err))
    }
}

impl From<zip::result::ZipError> for CommandError {
    fn from(err: zip::result::ZipError) -> Self {
        match err {
            zip::result::ZipError::Io(e) => CommandError::from(e),
            other => CommandError::Other(format!("Archive error: {}", other)),
        }
    }
}

/// Errors raised by the command executor itself.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Command engine has been shut down")]
    Stopped,

    #[error("Cannot create handler '{type_name}': {source}")]
    Instantiation {
        type_name: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Command failed: {0}")]
    Failed(#[from] CommandError),

    #[error("Cannot start worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Application-level errors, used by the front end.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fs(#[from] FsError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{name} failed: {message}")]
    Task { name: String, message: String },
}

pub type AppResult<T> = Result<T, AppError>;
