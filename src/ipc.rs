//! IPC surface: newline-delimited JSON over a Unix domain socket.
//!
//! One JSON request object per line, one JSON response object per line.
//! The caller identity is derived from the socket's peer credentials
//! (`unix:uid=<uid>,pid=<pid>`), filling the role the original daemon gave
//! to the sender's bus name. Connections are handled on independent tasks;
//! the Manager's internal mutex serializes registry access.
//!
//! ```text
//! -> {"op":"register-device","device":"/dev/sensor0"}
//! <- {"result":"done"}
//! -> {"op":"get-devices"}
//! <- {"result":"devices","devices":["/dev/sensor0"]}
//! ```
//!
//! A line that does not parse yields an `invalid-request` error response;
//! the connection stays open.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::device::DeviceId;
use crate::manager::{Manager, ManagerFault};

/// Wire code for request lines that could not be parsed.
pub const CODE_INVALID_REQUEST: &str = "invalid-request";

/// A single IPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Request {
    /// List the identities of all registered devices.
    GetDevices,
    /// Return the first registered device.
    GetDefaultDevice,
    /// Register or re-target a device. Authorization-gated.
    RegisterDevice {
        /// Identity of the device to register.
        device: DeviceId,
    },
    /// Suspend every registered device.
    Suspend,
    /// Resume every registered device.
    Resume,
}

/// A single IPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum Response {
    /// Device identities in registry iteration order.
    Devices {
        /// The identities.
        devices: Vec<DeviceId>,
    },
    /// A single device identity.
    Device {
        /// The selected identity.
        device: DeviceId,
    },
    /// The operation completed with no payload.
    Done,
    /// A named fault.
    Error {
        /// Stable machine-readable code.
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl Response {
    fn fault(fault: &ManagerFault) -> Self {
        Self::Error {
            code: fault.code().to_owned(),
            message: fault.to_string(),
        }
    }
}

/// Route one request to the Manager on behalf of `caller`.
pub async fn dispatch(manager: &Manager, caller: &str, request: Request) -> Response {
    match request {
        Request::GetDevices => Response::Devices {
            devices: manager.get_devices().await,
        },
        Request::GetDefaultDevice => match manager.get_default_device().await {
            Ok(device) => Response::Device { device },
            Err(fault) => Response::fault(&fault),
        },
        Request::RegisterDevice { device } => {
            match manager.register_device(caller, device).await {
                Ok(()) => Response::Done,
                Err(fault) => Response::fault(&fault),
            }
        }
        Request::Suspend => match manager.suspend().await {
            Ok(()) => Response::Done,
            Err(fault) => Response::fault(&fault),
        },
        Request::Resume => match manager.resume().await {
            Ok(()) => Response::Done,
            Err(fault) => Response::fault(&fault),
        },
    }
}

/// Accept loop for the daemon's Unix socket.
pub struct IpcServer {
    manager: Arc<Manager>,
}

impl IpcServer {
    /// Create a server fronting `manager`.
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    /// Bind `socket_path` and serve connections until the task is dropped.
    ///
    /// A stale socket file from a previous run is removed before binding.
    /// Anything else already at that path is left alone and reported as a
    /// configuration error.
    ///
    /// # Errors
    ///
    /// Returns an error if `socket_path` is occupied by a non-socket, the
    /// socket cannot be bound, or the accept loop fails.
    pub async fn serve(&self, socket_path: &Path) -> anyhow::Result<()> {
        use std::os::unix::fs::FileTypeExt;

        match std::fs::symlink_metadata(socket_path) {
            Ok(metadata) if metadata.file_type().is_socket() => {
                std::fs::remove_file(socket_path).with_context(|| {
                    format!("failed to remove stale socket {}", socket_path.display())
                })?;
            }
            Ok(_) => anyhow::bail!(
                "refusing to remove {}: not a socket",
                socket_path.display()
            ),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("failed to inspect {}", socket_path.display())
                });
            }
        }
        let listener = UnixListener::bind(socket_path)
            .with_context(|| format!("failed to bind {}", socket_path.display()))?;
        info!(socket = %socket_path.display(), "IPC server listening");

        loop {
            let (stream, _addr) = listener.accept().await.context("accept failed")?;
            let manager = Arc::clone(&self.manager);
            tokio::spawn(async move {
                if let Err(e) = handle_connection(manager, stream).await {
                    warn!(error = %e, "IPC connection ended with error");
                }
            });
        }
    }
}

/// Derive the caller identity string from socket peer credentials.
fn caller_identity(stream: &UnixStream) -> String {
    match stream.peer_cred() {
        Ok(cred) => match cred.pid() {
            Some(pid) => format!("unix:uid={},pid={pid}", cred.uid()),
            None => format!("unix:uid={}", cred.uid()),
        },
        Err(e) => {
            warn!(error = %e, "peer credentials unavailable");
            "unix:unknown".to_owned()
        }
    }
}

async fn handle_connection(manager: Arc<Manager>, stream: UnixStream) -> std::io::Result<()> {
    let caller = caller_identity(&stream);
    debug!(caller = %caller, "IPC connection accepted");

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&manager, &caller, request).await,
            Err(e) => {
                warn!(caller = %caller, error = %e, "unparseable IPC request");
                Response::Error {
                    code: CODE_INVALID_REQUEST.to_owned(),
                    message: e.to_string(),
                }
            }
        };
        let mut encoded = serde_json::to_string(&response).map_err(std::io::Error::other)?;
        encoded.push('\n');
        write_half.write_all(encoded.as_bytes()).await?;
    }

    debug!(caller = %caller, "IPC connection closed");
    Ok(())
}
