use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures in kernel lifecycle management.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The kernel process was spawned but never answered a heartbeat.
    #[error("kernel did not become reachable within {0:?}")]
    StartupTimeout(Duration),

    /// Shutdown was requested on a kernel this program merely attached to.
    /// Only the program that started a kernel may stop it.
    #[error("kernel '{kernel_id}' was not started by this program; refusing to shut it down")]
    PermissionDenied { kernel_id: String },

    /// The connection file exists but the kernel behind it is not answering.
    #[error("kernel at {0} is not responding to heartbeats")]
    NotResponding(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed connection file: {0}")]
    BadConnectionFile(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] anyhow::Error),
}

/// Failures on the per-session message channels.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The connection handshake did not complete in time. Callers surface
    /// this to the operator; they must not retry silently.
    #[error("kernel did not complete the connection handshake within {0:?}")]
    ConnectTimeout(Duration),

    /// No message arrived within the poll interval. Ordinary during
    /// execution; the bridge uses it as a chance to check for input requests.
    #[error("no message within {0:?}")]
    Empty(Duration),

    /// The transport failed in a way a timeout does not explain, e.g. the
    /// kernel process died mid-execution.
    #[error("kernel connection lost: {0}")]
    Dropped(anyhow::Error),

    /// `answer_input_prompt` was called with no input request outstanding.
    #[error("no input request is pending a reply")]
    NoPendingInput,
}

impl ChannelError {
    /// True for the ordinary poll-timeout case, false for real failures.
    pub fn is_empty(&self) -> bool {
        matches!(self, ChannelError::Empty(_))
    }
}
