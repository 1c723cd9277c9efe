//! Error types for the virtualization interface.

use thiserror::Error;

/// Result type alias for hypervisor operations.
pub type HypervisorResult<T> = Result<T, HypervisorError>;

/// Errors that can occur when talking to a virtualization backend.
#[derive(Debug, Error)]
pub enum HypervisorError {
    /// No machine with the given name is known to the backend.
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// The connection to the backend is gone. Fatal to the process;
    /// no reconnection logic exists above this layer.
    #[error("connection to hypervisor lost: {0}")]
    ConnectionLost(String),

    /// A machine descriptor could not be parsed or is missing required
    /// fields.
    #[error("invalid machine config: {0}")]
    InvalidConfig(String),

    /// A lifecycle call (define/start) was rejected by the backend.
    #[error("operation failed for {name}: {reason}")]
    OperationFailed { name: String, reason: String },
}
