//! Jupyter kernel sessions for taskdeck.
//!
//! This crate owns everything between the task executor and a running
//! kernel process: starting or attaching to a kernel (`session`), finding
//! kernels already running on the host (`discovery`), and the per-session
//! channel client the execution bridge drives (`channels`).
//!
//! The wire protocol itself comes from `jupyter-protocol` and `runtimelib`
//! and is never reimplemented here.

pub mod channels;
pub mod discovery;
pub mod error;
pub mod session;

pub use channels::{ExecuteChannels, KernelChannels};
pub use error::{ChannelError, SessionError};
pub use session::KernelSession;
