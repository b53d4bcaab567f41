//! IPC-facing manager facade.
//!
//! Composes the authorization gate and the device registry: each exposed
//! operation runs zero or one gate check, then delegates to the registry.
//! The registry is the only shared mutable state; a single mutex serializes
//! every read and mutation so concurrent callers cannot observe a
//! half-applied registration or race a broadcast.

use tokio::sync::Mutex;
use tracing::debug;

use crate::authority::{AuthorizationError, AuthorizationGate};
use crate::device::{DeviceError, DeviceId};
use crate::registry::{DeviceRegistry, RegistryError};

/// Faults surfaced to IPC callers.
///
/// Clients can branch on "no device" vs "not authorized" vs "device
/// operation failed"; sub-causes within the authorization branch are
/// deliberately not distinguishable.
#[derive(Debug, thiserror::Error)]
pub enum ManagerFault {
    /// The registry was empty when a default device was requested.
    #[error("no such device")]
    NoSuchDevice,
    /// The caller is not authorized for the attempted action.
    #[error("permission denied: {0}")]
    PermissionDenied(#[from] AuthorizationError),
    /// A device backend operation failed; the message is the backend's.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl ManagerFault {
    /// Stable machine-readable code for the IPC wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchDevice => "no-such-device",
            Self::PermissionDenied(_) => "permission-denied",
            Self::Device(_) => "device-failure",
        }
    }
}

/// The daemon facade exposed over IPC.
pub struct Manager {
    registry: Mutex<DeviceRegistry>,
    gate: AuthorizationGate,
    register_action: String,
}

impl Manager {
    /// Create a manager owning `registry`, gated by `gate`.
    ///
    /// `register_action` is the authority action id checked for
    /// [`register_device`](Self::register_device).
    pub fn new(
        registry: DeviceRegistry,
        gate: AuthorizationGate,
        register_action: impl Into<String>,
    ) -> Self {
        Self {
            registry: Mutex::new(registry),
            gate,
            register_action: register_action.into(),
        }
    }

    /// Identities of all registered devices. Unauthenticated.
    pub async fn get_devices(&self) -> Vec<DeviceId> {
        debug!("get devices");
        self.registry.lock().await.identities()
    }

    /// Identity of the first registered device. Unauthenticated.
    pub async fn get_default_device(&self) -> Result<DeviceId, ManagerFault> {
        debug!("get default device");
        let registry = self.registry.lock().await;
        match registry.default_device() {
            Ok(info) => Ok(info.identity),
            Err(RegistryError::NoSuchDevice) => Err(ManagerFault::NoSuchDevice),
        }
    }

    /// Register (or re-target) `identity` on behalf of `caller`.
    ///
    /// The gate check runs before the registry lock is taken: a denied
    /// caller never touches the registry, so a refusal leaves it unchanged.
    pub async fn register_device(
        &self,
        caller: &str,
        identity: DeviceId,
    ) -> Result<(), ManagerFault> {
        self.gate.authorize(caller, &self.register_action).await?;

        debug!(caller, device = %identity, "register device");
        let mut registry = self.registry.lock().await;
        registry.register(identity, caller).await?;
        Ok(())
    }

    /// Suspend every registered device, in iteration order.
    ///
    /// Unauthenticated, matching the observed design of the daemon this
    /// replaces (`DESIGN.md` flags the open question). The first backend
    /// failure aborts the broadcast and propagates.
    pub async fn suspend(&self) -> Result<(), ManagerFault> {
        debug!("suspend broadcast");
        self.registry.lock().await.suspend_all().await?;
        debug!("suspend broadcast complete");
        Ok(())
    }

    /// Resume every registered device; same policy as
    /// [`suspend`](Self::suspend).
    pub async fn resume(&self) -> Result<(), ManagerFault> {
        debug!("resume broadcast");
        self.registry.lock().await.resume_all().await?;
        debug!("resume broadcast complete");
        Ok(())
    }
}
