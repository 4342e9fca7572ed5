//! Kernel process lifecycle: start, attach, interrupt, shutdown.
//!
//! A `KernelSession` either *owns* its kernel (this program started the
//! process and may stop it) or is merely *attached* to one that something
//! else started. Attached sessions can be used for execution and
//! interrupted, but `shutdown` refuses with `PermissionDenied`.

use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use jupyter_protocol::{ConnectionInfo, InterruptRequest, JupyterMessage, ShutdownRequest};
use log::{debug, info};
use uuid::Uuid;

use crate::error::SessionError;

/// Default budget for a freshly spawned kernel to come up.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix for connection files written by this program.
pub(crate) const CONNECTION_FILE_PREFIX: &str = "taskdeck-kernel-";

/// How long a single liveness probe waits for a heartbeat echo.
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(2);

fn protocol<E: Into<anyhow::Error>>(e: E) -> SessionError {
    SessionError::Protocol(e.into())
}

/// Handle to one running kernel process.
pub struct KernelSession {
    kernel_id: String,
    session_id: String,
    connection_info: ConnectionInfo,
    connection_file: PathBuf,
    owned: bool,
    process: Option<tokio::process::Child>,
    #[cfg(unix)]
    process_group_id: Option<i32>,
}

impl KernelSession {
    /// Launch a new kernel of the named kernelspec kind and wait until it is
    /// reachable. The session owns the process and may shut it down.
    pub async fn start(name: &str, startup_timeout: Duration) -> Result<Self, SessionError> {
        let kernelspec = runtimelib::find_kernelspec(name).await.map_err(protocol)?;

        let ip = std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));
        let ports = runtimelib::peek_ports(ip, 5).await.map_err(protocol)?;

        let connection_info = ConnectionInfo {
            transport: jupyter_protocol::connection_info::Transport::TCP,
            ip: ip.to_string(),
            stdin_port: ports[0],
            control_port: ports[1],
            hb_port: ports[2],
            shell_port: ports[3],
            iopub_port: ports[4],
            signature_scheme: "hmac-sha256".to_string(),
            key: Uuid::new_v4().to_string(),
            kernel_name: Some(name.to_string()),
        };

        let runtime_dir = runtimelib::dirs::runtime_dir();
        tokio::fs::create_dir_all(&runtime_dir).await?;

        let kernel_id = petname::petname(2, "-").unwrap_or_else(|| Uuid::new_v4().to_string());
        let connection_file = runtime_dir.join(format!("{CONNECTION_FILE_PREFIX}{kernel_id}.json"));
        tokio::fs::write(
            &connection_file,
            serde_json::to_string_pretty(&connection_info)?,
        )
        .await?;

        info!("starting kernel '{}' at {:?}", name, connection_file);

        let mut cmd = kernelspec
            .command(&connection_file, Some(Stdio::null()), Some(Stdio::null()))
            .map_err(protocol)?;
        #[cfg(unix)]
        cmd.process_group(0);

        let process = cmd.spawn()?;
        #[cfg(unix)]
        let process_group_id = process.id().map(|pid| pid as i32);

        let session = KernelSession {
            kernel_id,
            session_id: Uuid::new_v4().to_string(),
            connection_info,
            connection_file,
            owned: true,
            process: Some(process),
            #[cfg(unix)]
            process_group_id,
        };

        session.wait_until_alive(startup_timeout).await?;
        info!("kernel started: {}", session.kernel_id);
        Ok(session)
    }

    /// Attach to an already-running kernel via its connection file. The
    /// session does not own the process and may not shut it down.
    pub async fn attach(connection_file: impl AsRef<Path>) -> Result<Self, SessionError> {
        let connection_file = connection_file.as_ref().to_path_buf();
        let content = tokio::fs::read_to_string(&connection_file).await?;
        let connection_info: ConnectionInfo = serde_json::from_str(&content)?;

        if !check_heartbeat(&connection_info, HEARTBEAT_TIMEOUT).await {
            return Err(SessionError::NotResponding(connection_file));
        }

        let kernel_id = kernel_id_from_path(&connection_file);
        debug!("attached to kernel '{}' at {:?}", kernel_id, connection_file);

        Ok(Self::attached(connection_info, connection_file, kernel_id))
    }

    /// Build an attached (not owned) handle without probing liveness.
    pub(crate) fn attached(
        connection_info: ConnectionInfo,
        connection_file: PathBuf,
        kernel_id: String,
    ) -> Self {
        KernelSession {
            kernel_id,
            session_id: Uuid::new_v4().to_string(),
            connection_info,
            connection_file,
            owned: false,
            process: None,
            #[cfg(unix)]
            process_group_id: None,
        }
    }

    pub fn kernel_id(&self) -> &str {
        &self.kernel_id
    }

    /// Client session id used as the identity on all channels to this kernel.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.connection_info
    }

    pub fn connection_file(&self) -> &Path {
        &self.connection_file
    }

    /// True if this program started the kernel and may shut it down.
    pub fn is_owned(&self) -> bool {
        self.owned
    }

    /// Single heartbeat probe with a short timeout.
    pub async fn is_alive(&self) -> bool {
        check_heartbeat(&self.connection_info, HEARTBEAT_TIMEOUT).await
    }

    /// Ask the kernel to abandon its current evaluation. The process keeps
    /// running; the interrupted request ends with an ordinary error/idle
    /// sequence on the broadcast stream.
    pub async fn interrupt(&self) -> Result<(), SessionError> {
        let mut control =
            runtimelib::create_client_control_connection(&self.connection_info, &self.session_id)
                .await
                .map_err(protocol)?;

        let request: JupyterMessage = InterruptRequest {}.into();
        control.send(request).await.map_err(protocol)?;
        info!("sent interrupt_request to kernel '{}'", self.kernel_id);
        Ok(())
    }

    /// Terminate the kernel. Fails with `PermissionDenied` on attached
    /// sessions: the external owner of the process is the only valid
    /// shutdown path for those.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if !self.owned {
            return Err(SessionError::PermissionDenied {
                kernel_id: self.kernel_id.clone(),
            });
        }

        info!("shutting down kernel '{}'", self.kernel_id);

        // Graceful request first; the SIGKILL below is the backstop.
        if let Ok(mut control) =
            runtimelib::create_client_control_connection(&self.connection_info, &self.session_id)
                .await
        {
            let request: JupyterMessage = ShutdownRequest { restart: false }.into();
            control.send(request).await.ok();
        }

        self.kill_process();
        tokio::fs::remove_file(&self.connection_file).await.ok();
        Ok(())
    }

    /// Release ownership without stopping the kernel. The process keeps
    /// running and the connection file stays in place for a later attach.
    /// Returns the connection file path.
    pub fn detach(mut self) -> PathBuf {
        self.owned = false;
        self.process = None;
        #[cfg(unix)]
        {
            self.process_group_id = None;
        }
        self.connection_file.clone()
    }

    async fn wait_until_alive(&self, startup_timeout: Duration) -> Result<(), SessionError> {
        let deadline = tokio::time::Instant::now() + startup_timeout;
        loop {
            if check_heartbeat(&self.connection_info, HEARTBEAT_TIMEOUT).await {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SessionError::StartupTimeout(startup_timeout));
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    fn kill_process(&mut self) {
        #[cfg(unix)]
        if let Some(pgid) = self.process_group_id.take() {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
                if e != nix::errno::Errno::ESRCH {
                    log::error!("failed to kill kernel process group {}: {}", pgid, e);
                }
            }
        }
        #[cfg(not(unix))]
        if let Some(child) = self.process.as_mut() {
            let _ = child.start_kill();
        }
        self.process = None;
    }
}

impl Drop for KernelSession {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        self.kill_process();
        let _ = std::fs::remove_file(&self.connection_file);
        info!("kernel '{}' stopped on drop", self.kernel_id);
    }
}

/// Send a single heartbeat ping and wait for the echo.
///
/// ZeroMQ connects never fail fast, so this is the only reliable way to tell
/// a live kernel from a stale connection file before opening channels.
pub(crate) async fn check_heartbeat(connection_info: &ConnectionInfo, timeout: Duration) -> bool {
    let heartbeat_result = tokio::time::timeout(timeout, async {
        let mut hb = runtimelib::create_client_heartbeat_connection(connection_info).await?;
        hb.single_heartbeat().await
    })
    .await;

    matches!(heartbeat_result, Ok(Ok(())))
}

/// Derive a kernel id from a connection file name, stripping the common
/// `kernel-` / `taskdeck-kernel-` prefixes.
pub(crate) fn kernel_id_from_path(path: &Path) -> String {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("kernel");
    stem.strip_prefix(CONNECTION_FILE_PREFIX)
        .or_else(|| stem.strip_prefix("kernel-"))
        .unwrap_or(stem)
        .to_string()
}
