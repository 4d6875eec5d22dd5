//! twincom - command engine and pluggable virtual file system for a
//! two-panel file manager

pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod ops;
pub mod panel;
pub mod providers;

pub use twincom_plugin_api as api;
