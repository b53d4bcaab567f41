//! Device capability seam.
//!
//! A registered device is backed by an opaque capability implemented by the
//! sensor layer: it can be suspended, resumed, and re-targeted at a new
//! owner. The registry core never looks behind this seam, which keeps the
//! sensor driver and matching logic out of the trusted registry code and
//! lets tests inject scripted capabilities.

use std::fmt;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Opaque stable identifier for a sensor device (an object path or similar).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wrap a raw identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Lifecycle state of a registered device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceState {
    /// Device is live and accepting sensor operations.
    Active,
    /// Device has been suspended by a lifecycle broadcast.
    Suspended,
}

/// Failure reported by a device backend.
///
/// These errors are propagated to IPC callers verbatim and abort any
/// lifecycle broadcast in progress.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    /// The backend rejected or failed the operation.
    #[error("device backend failure: {0}")]
    Backend(String),
}

/// Capability exposed by the sensor layer for one device.
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Suspend the device.
    async fn suspend(&self) -> Result<(), DeviceError>;

    /// Resume a suspended device.
    async fn resume(&self) -> Result<(), DeviceError>;

    /// Point the device at its (possibly new) identity and owning caller.
    async fn set_target(&self, identity: &DeviceId, owner: &str) -> Result<(), DeviceError>;
}

/// Creates the capability for a device the first time it is registered.
pub trait DeviceFactory: Send + Sync {
    /// Build the control endpoint for `identity`.
    fn create(&self, identity: &DeviceId) -> Result<Arc<dyn DeviceControl>, DeviceError>;
}

// ---------------------------------------------------------------------------
// Loopback capability
// ---------------------------------------------------------------------------

/// In-process device control used when no sensor backend is attached.
///
/// Every operation succeeds; the last target is remembered so the daemon
/// surface stays exercisable (and observable in tests) without hardware.
#[derive(Debug, Default)]
pub struct LoopbackDevice {
    target: Mutex<Option<(DeviceId, String)>>,
}

impl LoopbackDevice {
    /// The identity/owner pair from the most recent `set_target`, if any.
    pub fn target(&self) -> Option<(DeviceId, String)> {
        match self.target.lock() {
            Ok(target) => target.clone(),
            Err(e) => {
                warn!(error = %e, "loopback target lock poisoned");
                None
            }
        }
    }
}

#[async_trait]
impl DeviceControl for LoopbackDevice {
    async fn suspend(&self) -> Result<(), DeviceError> {
        debug!("loopback device suspended");
        Ok(())
    }

    async fn resume(&self) -> Result<(), DeviceError> {
        debug!("loopback device resumed");
        Ok(())
    }

    async fn set_target(&self, identity: &DeviceId, owner: &str) -> Result<(), DeviceError> {
        debug!(device = %identity, owner, "loopback device re-targeted");
        if let Ok(mut target) = self.target.lock() {
            *target = Some((identity.clone(), owner.to_owned()));
        }
        Ok(())
    }
}

/// Factory producing [`LoopbackDevice`] controls; the daemon default.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoopbackFactory;

impl DeviceFactory for LoopbackFactory {
    fn create(&self, identity: &DeviceId) -> Result<Arc<dyn DeviceControl>, DeviceError> {
        debug!(device = %identity, "creating loopback device control");
        Ok(Arc::new(LoopbackDevice::default()))
    }
}
