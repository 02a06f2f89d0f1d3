//! Error types and handling
//!
//! This module provides the error taxonomy shared by the reconcilers and the
//! acme.sh adapter. Errors that reach the command line are rendered in a
//! consistent JSON format so the orchestration layer can parse them.

use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::services::process::CommandOutput;

/// Convergence error types
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Caller-provided configuration violates a precondition
    #[error("Invalid specification: {0}")]
    InvalidSpecification(String),

    /// The acme.sh binary is missing for a certificate operation
    #[error("acme.sh not found at {0}, run the install action first")]
    ToolNotFound(String),

    /// Installing acme.sh failed
    #[error("Failed to install acme.sh: {message}")]
    ToolInstallError {
        message: String,
        output: Option<CommandOutput>,
    },

    /// An acme.sh invocation exited non-zero without a recognised marker
    #[error("acme.sh {} failed with exit code {}", .operation, exit_code_label(.output.exit_code))]
    OperationError {
        operation: String,
        output: CommandOutput,
    },

    /// Configuration file problem
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem or process spawn failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

fn exit_code_label(code: Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

impl ConvergeError {
    /// Stable identifier for the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            ConvergeError::InvalidSpecification(_) => "invalid_specification",
            ConvergeError::ToolNotFound(_) => "tool_not_found",
            ConvergeError::ToolInstallError { .. } => "tool_install_error",
            ConvergeError::OperationError { .. } => "operation_error",
            ConvergeError::Config(_) => "config_error",
            ConvergeError::Io(_) => "io_error",
            ConvergeError::Internal(_) => "internal_error",
        }
    }

    /// Raw output of the failed external command, if there was one
    pub fn command_output(&self) -> Option<&CommandOutput> {
        match self {
            ConvergeError::ToolInstallError { output, .. } => output.as_ref(),
            ConvergeError::OperationError { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Shorthand for an invalid specification
    pub fn invalid(message: impl Into<String>) -> Self {
        ConvergeError::InvalidSpecification(message.into())
    }
}

/// Error response body
#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Error code for programmatic handling (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            details: None,
            code: None,
        }
    }

    /// Add details to the error response
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Add an error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<&ConvergeError> for ErrorResponse {
    fn from(err: &ConvergeError) -> Self {
        let kind = err.kind();

        if !matches!(err, ConvergeError::InvalidSpecification(_)) {
            error!(error = %err, error_type = kind, "Convergence error");
        }

        let response = ErrorResponse::new(kind, err.to_string());
        match err.command_output() {
            Some(output) => match serde_json::to_value(output) {
                Ok(details) => response.with_details(details),
                Err(_) => response,
            },
            None => response,
        }
    }
}

/// Result type alias for convergence operations
pub type ConvergeResult<T> = Result<T, ConvergeError>;
