//! Per-session channel client driven by the execution bridge.
//!
//! One `KernelChannels` binds the iopub, shell and stdin channels to a
//! single kernel session. It is private to one bridge invocation and never
//! shared across concurrently running tasks; dropping it releases the
//! sockets.

use std::future::Future;
use std::time::Duration;

use jupyter_protocol::{
    ExecuteRequest, InputReply, JupyterMessage, KernelInfoRequest, ReplyStatus,
};
use log::debug;

use crate::error::ChannelError;
use crate::session::{check_heartbeat, KernelSession};

/// Probe budget used before opening channels, so a dead kernel fails fast
/// instead of hanging in a ZeroMQ connect that never completes.
const PRECONNECT_PROBE: Duration = Duration::from_secs(2);

fn dropped<E: Into<anyhow::Error>>(e: E) -> ChannelError {
    ChannelError::Dropped(e.into())
}

/// The submit/receive surface the execution bridge drives.
///
/// `KernelChannels` is the real transport; tests script the same surface
/// with synthetic message streams. The futures are declared `Send` so
/// bridge invocations can run on spawned tasks.
pub trait ExecuteChannels {
    /// Queue a snippet for execution. Non-blocking; returns the request id
    /// that correlates every subsequent message for this execution.
    fn submit(
        &mut self,
        code: &str,
        allow_input: bool,
    ) -> impl Future<Output = Result<String, ChannelError>> + Send;

    /// Next message on the shared broadcast stream, whichever request it
    /// belongs to. `Err(Empty)` after `timeout` with no traffic.
    fn receive_broadcast(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<JupyterMessage, ChannelError>> + Send;

    /// Next message on the dedicated input-request stream.
    fn receive_input_prompt(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<JupyterMessage, ChannelError>> + Send;

    /// Send the operator's reply to the most recently received input request.
    fn answer_input_prompt(
        &mut self,
        value: String,
    ) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

/// Channels bound to one kernel session.
pub struct KernelChannels {
    iopub: runtimelib::ClientIoPubConnection,
    shell: runtimelib::ClientShellConnection,
    stdin: runtimelib::ClientStdinConnection,
    /// The input request awaiting a reply; replies must be sent as children
    /// of the request message they answer.
    pending_input: Option<JupyterMessage>,
}

impl KernelChannels {
    /// Open the channels and prove the route end to end with a
    /// `kernel_info_request` handshake. Fails with `ConnectTimeout` when the
    /// kernel does not answer within `timeout`; callers surface that to the
    /// operator and must not retry silently.
    pub async fn connect(
        session: &KernelSession,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let info = session.connection_info();

        if !check_heartbeat(info, PRECONNECT_PROBE).await {
            return Err(ChannelError::ConnectTimeout(PRECONNECT_PROBE));
        }

        let session_id = session.session_id();
        let iopub = runtimelib::create_client_iopub_connection(info, "", session_id)
            .await
            .map_err(dropped)?;

        let identity = runtimelib::peer_identity_for_session(session_id).map_err(dropped)?;
        let mut shell = runtimelib::create_client_shell_connection_with_identity(
            info,
            session_id,
            identity.clone(),
        )
        .await
        .map_err(dropped)?;
        let stdin =
            runtimelib::create_client_stdin_connection_with_identity(info, session_id, identity)
                .await
                .map_err(dropped)?;

        let request: JupyterMessage = KernelInfoRequest::default().into();
        shell.send(request).await.map_err(dropped)?;
        match tokio::time::timeout(timeout, shell.read()).await {
            Ok(Ok(reply)) => {
                debug!("connected to kernel: got {} reply", reply.header.msg_type);
            }
            Ok(Err(e)) => return Err(dropped(e)),
            Err(_) => return Err(ChannelError::ConnectTimeout(timeout)),
        }

        Ok(KernelChannels {
            iopub,
            shell,
            stdin,
            pending_input: None,
        })
    }

    /// Release the channels. Dropping has the same effect; this form reads
    /// better at call sites that want the release to be visible.
    pub fn disconnect(self) {
        debug!("kernel channels released");
    }
}

impl ExecuteChannels for KernelChannels {
    async fn submit(&mut self, code: &str, allow_input: bool) -> Result<String, ChannelError> {
        let mut request = ExecuteRequest::new(code.to_string());
        request.allow_stdin = allow_input;

        let message: JupyterMessage = request.into();
        let msg_id = message.header.msg_id.clone();
        self.shell.send(message).await.map_err(dropped)?;

        debug!("sent execute_request: msg_id={}", msg_id);
        Ok(msg_id)
    }

    async fn receive_broadcast(
        &mut self,
        timeout: Duration,
    ) -> Result<JupyterMessage, ChannelError> {
        match tokio::time::timeout(timeout, self.iopub.read()).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(e)) => Err(dropped(e)),
            Err(_) => Err(ChannelError::Empty(timeout)),
        }
    }

    async fn receive_input_prompt(
        &mut self,
        timeout: Duration,
    ) -> Result<JupyterMessage, ChannelError> {
        match tokio::time::timeout(timeout, self.stdin.read()).await {
            Ok(Ok(message)) => {
                self.pending_input = Some(message.clone());
                Ok(message)
            }
            Ok(Err(e)) => Err(dropped(e)),
            Err(_) => Err(ChannelError::Empty(timeout)),
        }
    }

    async fn answer_input_prompt(&mut self, value: String) -> Result<(), ChannelError> {
        let request = self
            .pending_input
            .take()
            .ok_or(ChannelError::NoPendingInput)?;

        let reply = InputReply {
            value,
            status: ReplyStatus::Ok,
            error: None,
        };
        self.stdin
            .send(reply.as_child_of(&request))
            .await
            .map_err(dropped)?;

        debug!("answered input_request {}", request.header.msg_id);
        Ok(())
    }
}
