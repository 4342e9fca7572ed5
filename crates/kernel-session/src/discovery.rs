//! Finding kernels that are already running on this host.
//!
//! Kernels advertise themselves through connection files in the Jupyter
//! runtime directory. Each candidate file is parsed and probed over the
//! heartbeat channel; only kernels that answer are offered for attachment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::future::join_all;
use log::debug;

use crate::error::SessionError;
use crate::session::{check_heartbeat, KernelSession, CONNECTION_FILE_PREFIX};

/// The Jupyter runtime directory where kernels drop their connection files.
pub fn runtime_dir() -> PathBuf {
    runtimelib::dirs::runtime_dir()
}

/// True for file names that follow a kernel connection file convention.
fn is_kernel_connection_file(path: &Path) -> bool {
    if path.extension().and_then(|s| s.to_str()) != Some("json") {
        return false;
    }
    let name = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
    name.starts_with("kernel-") || name.starts_with(CONNECTION_FILE_PREFIX)
}

async fn connection_files() -> Result<Vec<PathBuf>, SessionError> {
    let dir = runtime_dir();
    let mut files = Vec::new();

    let mut entries = match tokio::fs::read_dir(&dir).await {
        Ok(entries) => entries,
        // No runtime dir simply means no kernels have ever run here.
        Err(_) => return Ok(files),
    };
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_kernel_connection_file(&path) {
            files.push(path);
        }
    }
    Ok(files)
}

/// Enumerate running kernels the operator could attach to.
///
/// All candidates are probed concurrently; stale files and kernels that do
/// not answer are skipped. Every returned session is attached, not owned.
pub async fn list_candidate_sessions() -> Result<Vec<KernelSession>, SessionError> {
    let probes = connection_files().await?.into_iter().map(|path| async move {
        match KernelSession::attach(&path).await {
            Ok(session) => Some(session),
            Err(e) => {
                debug!("skipping {}: {}", path.display(), e);
                None
            }
        }
    });

    Ok(join_all(probes).await.into_iter().flatten().collect())
}

/// Find the running kernel whose connection info carries the given signing
/// key. The key doubles as a shared secret, so a match identifies one kernel
/// unambiguously even when connection files have been renamed.
pub async fn find_by_key(key: &str) -> Result<Option<KernelSession>, SessionError> {
    for path in connection_files().await? {
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let Ok(info) = serde_json::from_str::<jupyter_protocol::ConnectionInfo>(&content) else {
            debug!("{} is not a connection file", path.display());
            continue;
        };
        if info.key == key {
            return KernelSession::attach(&path).await.map(Some);
        }
    }
    Ok(None)
}

/// Remove connection files whose kernel no longer answers heartbeats.
/// Returns the paths that were (or with `dry_run` would be) removed.
pub async fn sweep_stale_connection_files(
    timeout: Duration,
    dry_run: bool,
) -> Result<Vec<PathBuf>, SessionError> {
    let mut removed = Vec::new();

    for path in connection_files().await? {
        let Ok(content) = tokio::fs::read_to_string(&path).await else {
            continue;
        };
        let Ok(info) = serde_json::from_str::<jupyter_protocol::ConnectionInfo>(&content) else {
            continue;
        };

        if check_heartbeat(&info, timeout).await {
            continue;
        }
        if !dry_run {
            tokio::fs::remove_file(&path).await?;
        }
        removed.push(path);
    }

    Ok(removed)
}
