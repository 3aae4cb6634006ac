//! Custom error types for the application.
//!
//! This module defines the primary error type, `LoggerError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to handle the failure taxonomy of the polling engine:
//!
//! - **`SourceNotFound`**: the named instrument source is absent from the
//!   connection hub. Never retried; it aborts that watcher's contribution for
//!   the current cycle only.
//! - **`DeviceNotSelected`**: the source reported that no hardware device is
//!   selected. This is the one condition that triggers the embedded
//!   reselect-and-retry in `Watcher::take_point`.
//! - **`NoSuchDevice`**: device selection found no candidate matching the
//!   configured device name.
//! - **`NoData`**: a source returned an empty reading set.
//! - **`DatasetNotFound`**: the store reports that the dataset a row was
//!   appended to no longer exists. Recovered once per cycle by recreating the
//!   dataset and retrying the append.
//! - **`AlreadyRunning`**: `Scheduler::start` was called while the loop was
//!   already active.
//! - **`SchemaMismatch`**: a merged row no longer matches the current
//!   dataset's declared schema; the cycle is rejected rather than written.
//!
//! Nothing here is fatal to the process: the session degrades every failure
//! path to "record and continue".

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, LoggerError>;

/// Central error type for the logging engine.
#[derive(Error, Debug)]
pub enum LoggerError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("'{source_name}' source not found")]
    SourceNotFound { source_name: String },

    #[error("No device selected on '{source_name}'")]
    DeviceNotSelected { source_name: String },

    #[error("No such device on '{source_name}': {device}")]
    NoSuchDevice { source_name: String, device: String },

    #[error("'{source_name}' returned no data")]
    NoData { source_name: String },

    #[error("Read from '{source_name}' failed: {message}")]
    Read { source_name: String, message: String },

    #[error("Dataset '{name}' not found in store")]
    DatasetNotFound { name: String },

    #[error("Store error: {0}")]
    Store(String),

    #[error("Poll loop is already running")]
    AlreadyRunning,

    #[error("Row length {actual} does not match dataset schema ({expected} columns)")]
    SchemaMismatch { expected: usize, actual: usize },
}

impl LoggerError {
    /// True for the one source condition that warrants a device reselect
    /// followed by a single read retry.
    pub fn is_device_not_selected(&self) -> bool {
        matches!(self, LoggerError::DeviceNotSelected { .. })
    }

    /// True for the store condition recovered by recreating the dataset and
    /// retrying the append once.
    pub fn is_dataset_loss(&self) -> bool {
        matches!(self, LoggerError::DatasetNotFound { .. })
    }
}
