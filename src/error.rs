//! Error types for the Block Device Plugin
//!
//! Provides structured error types for device discovery, allocation,
//! configuration loading, and the kubelet-facing gRPC surface.

use thiserror::Error;

/// Unified error type for the plugin
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Hardware Discovery Errors
    // =========================================================================
    #[error("Hardware discovery failed: {0}")]
    HardwareDiscovery(String),

    #[error("Invalid device pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // =========================================================================
    // Allocation Errors
    // =========================================================================
    #[error("No capacity available for container {container_index}: every device is at its upper limit of {upper_limit}")]
    NoCapacity {
        container_index: usize,
        upper_limit: u32,
    },

    #[error("Insufficient devices: requested {requested}, available {available}")]
    InsufficientDevices { requested: usize, available: usize },

    // =========================================================================
    // Plugin Lifecycle Errors
    // =========================================================================
    #[error("Failed to bind plugin socket {path}: {source}")]
    SocketBind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Plugin server did not become ready on {path}")]
    ServerNotReady { path: String },

    #[error("Registration with kubelet failed: {0}")]
    Registration(String),

    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("Failed to send on ListAndWatch stream: {0}")]
    StreamSend(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad failure classes used to decide how far an error propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Logged and replaced by defaults or stale values
    Transient,
    /// Request-scoped failure returned to the caller; the daemon keeps running
    Capacity,
    /// Aborts startup; the supervisor retries the whole daemon
    FatalStartup,
    /// Ends one ListAndWatch stream; kubelet reconnects
    Stream,
}

impl Error {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::NoCapacity { .. } | Error::InsufficientDevices { .. } => ErrorClass::Capacity,

            Error::SocketBind { .. }
            | Error::ServerNotReady { .. }
            | Error::Registration(_)
            | Error::Transport(_) => ErrorClass::FatalStartup,

            Error::StreamSend(_) => ErrorClass::Stream,

            _ => ErrorClass::Transient,
        }
    }

    /// Check if this error must abort daemon startup
    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::FatalStartup
    }

    /// Check if starting again can clear this error.
    ///
    /// A socket that cannot be bound needs the process restarted.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::SocketBind { .. })
    }

    /// Check if this error is a capacity error
    pub fn is_capacity(&self) -> bool {
        self.class() == ErrorClass::Capacity
    }
}

impl From<Error> for tonic::Status {
    fn from(err: Error) -> Self {
        match &err {
            Error::NoCapacity { .. } | Error::InsufficientDevices { .. } => {
                tonic::Status::resource_exhausted(err.to_string())
            }
            Error::HardwareDiscovery(_) => tonic::Status::unavailable(err.to_string()),
            _ => tonic::Status::internal(err.to_string()),
        }
    }
}

/// Result type alias for the plugin
pub type Result<T> = std::result::Result<T, Error>;
