//! Error types for vidpace.
//!
//! One enum per component, each carrying enough context to be logged
//! directly. `DemoError` is the top-level error returned by the control
//! loop and mapped to a process exit code by `main`.

use thiserror::Error;

/// Errors raised by frame sources.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open source '{source_name}': {reason}")]
    OpenFailed { source_name: String, reason: String },

    #[error("Frame grabbing failed on '{0}'")]
    GrabFailed(String),

    #[error("Frame retrieving failed on '{0}'")]
    RetrieveFailed(String),

    #[error("Source '{source_name}' rejected resolution {width}x{height}")]
    ResolutionRejected {
        source_name: String,
        width: u32,
        height: u32,
    },

    #[error("Source used before open(): '{0}'")]
    NotOpened(String),

    #[error("Failed to decode '{path}': {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to effect selection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EffectError {
    #[error("Unknown effect '{0}', expected one of: none, edges, corners, blur")]
    Unknown(String),
}

/// Errors related to the resolution table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LadderError {
    #[error("Resolution table is empty")]
    Empty,

    #[error("Resolution index {index} is outside the table [0-{len})")]
    OutOfRange { index: usize, len: usize },
}

/// Errors related to the resource scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("sched_setaffinity failed for {cpus} CPUs: {source}")]
    AffinityFailed {
        cpus: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Constraint upper bound {requested} exceeds the maximum level {max}")]
    InvalidConstraint { requested: u8, max: u8 },

    #[error("CPU affinity is unavailable on this host: {0}")]
    Unavailable(#[source] std::io::Error),
}

/// Errors related to IPC server operations.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command received: {0}")]
    InvalidCommand(String),

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to configuration management.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Failed to write configuration: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Errors related to logging initialization.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Could not determine a data directory for log files")]
    DataDirectoryNotFound,

    #[error("Failed to create log directory '{path}': {source}")]
    DirectoryCreationFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file appender: {0}")]
    AppenderCreationFailed(String),

    #[error("Invalid log filter '{0}'")]
    InvalidFilter(String),
}

/// Errors raised while writing a snapshot of the displayed frame.
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("No frame has been displayed yet")]
    NothingToSave,

    #[error("Snapshot directory is not configured")]
    NoDirectory,

    #[error("Failed to write snapshot '{path}': {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level errors.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Resolution error: {0}")]
    Ladder(#[from] LadderError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl DemoError {
    /// Process exit code for this error. 0 is reserved for clean shutdown.
    pub fn exit_code(&self) -> u8 {
        match self {
            DemoError::Capture(CaptureError::OpenFailed { .. }) => 2,
            DemoError::Capture(_) => 3,
            DemoError::Config(_) | DemoError::Ladder(_) => 4,
            DemoError::Logging(_) => 5,
            DemoError::Scheduler(_) | DemoError::Ipc(_) | DemoError::Runtime(_) => 1,
        }
    }
}
