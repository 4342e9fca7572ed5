use std::time::Duration;

use thiserror::Error;

/// The snippet could not be constructed from the given arguments. Raised
/// synchronously, before anything reaches the kernel.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Only strings, booleans, integers, floats and variable references can
    /// be rendered into a call expression.
    #[error(
        "argument cannot be rendered as a literal: {0}; \
         pass a string, boolean, integer, float, or a variable reference"
    )]
    UnsupportedValue(serde_json::Value),

    #[error("'{0}' is not a valid identifier")]
    InvalidIdentifier(String),

    #[error("'{0}' is not a valid module path")]
    InvalidModulePath(String),

    #[error("a response capture was requested without any variable names")]
    EmptyCapture,
}

/// Failures that end one task invocation. None of them terminate the
/// program or poison the session for the next invocation, except
/// `TransportDropped`, after which the session should be treated as suspect.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("could not build the code snippet: {0}")]
    Build(#[from] BuildError),

    #[error("kernel connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    #[error("connection to the kernel was lost mid-execution: {0}")]
    TransportDropped(anyhow::Error),

    #[error("the task is still running; its result is not available yet")]
    InvalidState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_mentions_supported_kinds() {
        let err = BuildError::UnsupportedValue(serde_json::json!([1, 2]));
        let text = err.to_string();
        assert!(text.contains("variable reference"));
        assert!(text.contains("[1,2]"));
    }

    #[test]
    fn test_exec_error_wraps_build_error() {
        let err: ExecError = BuildError::InvalidIdentifier("2fast".into()).into();
        assert!(err.to_string().contains("2fast"));
    }
}
