//! Error taxonomy for tunnel discovery and lifecycle operations

use std::time::Duration;
use thiserror::Error;

/// Rejections raised while validating a tunnel request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Port must be between 1 and 65535, got {0}")]
    PortOutOfRange(u32),

    #[error("Invalid port number: '{0}'")]
    InvalidPort(String),

    #[error("Tunnel name cannot be empty")]
    EmptyName,

    #[error("Tunnel name is {0} characters long, the limit is 63")]
    NameTooLong(usize),

    #[error("Invalid tunnel name '{0}': use letters, digits and hyphens, not starting or ending with a hyphen")]
    InvalidName(String),
}

/// Errors surfaced by the orchestrator to the menu
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TunnelError {
    #[error("Process table unavailable: {0}")]
    SnapshotUnavailable(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Process {pid} is not in the current tunnel list (refresh and try again)")]
    StaleReference { pid: u32 },

    #[error("Permission denied while terminating process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("`{command}` failed{}: {diagnostic}", .status.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    InvocationFailed {
        command: String,
        status: Option<i32>,
        diagnostic: String,
    },

    #[error("`{command}` did not exit within {}s; it was left running", .timeout.as_secs_f32())]
    InvocationTimedOut { command: String, timeout: Duration },
}

impl TunnelError {
    /// Build an `InvocationFailed` from an argument vector
    pub fn invocation_failed(
        argv: &[String],
        status: Option<i32>,
        diagnostic: impl Into<String>,
    ) -> Self {
        TunnelError::InvocationFailed {
            command: argv.join(" "),
            status,
            diagnostic: diagnostic.into(),
        }
    }
}
