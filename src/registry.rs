//! Insertion-ordered registry of sensor devices.
//!
//! The registry owns every device record for the lifetime of the process:
//! there is no removal operation. Registration is idempotent per identity —
//! registering an identity that already exists re-targets the existing
//! capability and records the new owner instead of creating a duplicate.
//! Lifecycle broadcasts walk the records in insertion order and abort on the
//! first backend failure, leaving later records untouched.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::device::{DeviceControl, DeviceError, DeviceFactory, DeviceId, DeviceState};

/// Registry-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No devices are registered.
    #[error("no such device")]
    NoSuchDevice,
}

/// Snapshot of one registered device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device identity.
    pub identity: DeviceId,
    /// Caller that most recently registered the device.
    pub owner: String,
    /// Current lifecycle state.
    pub state: DeviceState,
}

/// One registry record: bookkeeping plus the backing capability.
struct DeviceEntry {
    identity: DeviceId,
    owner: String,
    state: DeviceState,
    control: Arc<dyn DeviceControl>,
}

impl DeviceEntry {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            identity: self.identity.clone(),
            owner: self.owner.clone(),
            state: self.state,
        }
    }
}

/// The mapping from device identity to device record.
///
/// Insertion order is the iteration order for listing, default selection,
/// and broadcasts; callers must not rely on any particular order across
/// registrations. The registry itself is not synchronized — the [`Manager`]
/// wraps it in a mutex so that all reads and mutations are serialized.
///
/// [`Manager`]: crate::manager::Manager
pub struct DeviceRegistry {
    devices: Vec<DeviceEntry>,
    factory: Arc<dyn DeviceFactory>,
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("device_count", &self.devices.len())
            .finish()
    }
}

impl DeviceRegistry {
    /// Create an empty registry backed by `factory`.
    pub fn new(factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            devices: Vec::new(),
            factory,
        }
    }

    /// Register `identity` on behalf of `owner`.
    ///
    /// First registration creates a capability through the factory and a new
    /// Active record; re-registration re-targets the existing capability and
    /// records the new owner without touching its lifecycle state. Matching
    /// the behavior of the original daemon, the record exists before the
    /// capability is re-targeted, so a `set_target` failure propagates but
    /// does not remove the record. The owner travels through `set_target`:
    /// it is recorded only once the capability has accepted the re-target,
    /// so a failed re-target leaves the previous owner in place.
    pub async fn register(&mut self, identity: DeviceId, owner: &str) -> Result<(), DeviceError> {
        let idx = match self.devices.iter().position(|e| e.identity == identity) {
            Some(idx) => {
                debug!(device = %identity, owner, "re-registering existing device");
                idx
            }
            None => {
                let control = self.factory.create(&identity)?;
                self.devices.push(DeviceEntry {
                    identity: identity.clone(),
                    owner: String::new(),
                    state: DeviceState::Active,
                    control,
                });
                self.devices.len().saturating_sub(1)
            }
        };

        let entry = &mut self.devices[idx];
        entry.control.set_target(&entry.identity, owner).await?;
        entry.owner = owner.to_owned();
        info!(device = %entry.identity, owner, "device registered");
        Ok(())
    }

    /// Identities of all registered devices, in iteration order.
    pub fn identities(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|e| e.identity.clone()).collect()
    }

    /// Snapshot of all registered devices, in iteration order.
    pub fn list(&self) -> Vec<DeviceInfo> {
        self.devices.iter().map(DeviceEntry::info).collect()
    }

    /// The first device in iteration order.
    pub fn default_device(&self) -> Result<DeviceInfo, RegistryError> {
        self.devices
            .first()
            .map(DeviceEntry::info)
            .ok_or(RegistryError::NoSuchDevice)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry holds no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Suspend every device in iteration order.
    ///
    /// A record's state flips to Suspended only after its capability call
    /// succeeds. The first failure aborts the broadcast: devices not yet
    /// visited are untouched and already-suspended devices are not rolled
    /// back.
    pub async fn suspend_all(&mut self) -> Result<(), DeviceError> {
        for entry in &mut self.devices {
            entry.control.suspend().await?;
            entry.state = DeviceState::Suspended;
            debug!(device = %entry.identity, "device suspended");
        }
        Ok(())
    }

    /// Resume every device in iteration order; same abort policy as
    /// [`suspend_all`](Self::suspend_all).
    pub async fn resume_all(&mut self) -> Result<(), DeviceError> {
        for entry in &mut self.devices {
            entry.control.resume().await?;
            entry.state = DeviceState::Active;
            debug!(device = %entry.identity, "device resumed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    /// Capability stub that can be scripted to fail and counts calls.
    #[derive(Default)]
    struct ScriptedDevice {
        fail_suspend: AtomicBool,
        fail_resume: AtomicBool,
        fail_set_target: AtomicBool,
        suspend_calls: AtomicUsize,
        resume_calls: AtomicUsize,
    }

    #[async_trait]
    impl DeviceControl for ScriptedDevice {
        async fn suspend(&self) -> Result<(), DeviceError> {
            self.suspend_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_suspend.load(Ordering::SeqCst) {
                return Err(DeviceError::Backend("suspend refused".to_owned()));
            }
            Ok(())
        }

        async fn resume(&self) -> Result<(), DeviceError> {
            self.resume_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_resume.load(Ordering::SeqCst) {
                return Err(DeviceError::Backend("resume refused".to_owned()));
            }
            Ok(())
        }

        async fn set_target(&self, _identity: &DeviceId, _owner: &str) -> Result<(), DeviceError> {
            if self.fail_set_target.load(Ordering::SeqCst) {
                return Err(DeviceError::Backend("target refused".to_owned()));
            }
            Ok(())
        }
    }

    /// Factory handing out pre-built scripted devices in order.
    struct ScriptedFactory {
        devices: std::sync::Mutex<Vec<Arc<ScriptedDevice>>>,
    }

    impl ScriptedFactory {
        fn new(devices: Vec<Arc<ScriptedDevice>>) -> Arc<Self> {
            Arc::new(Self {
                devices: std::sync::Mutex::new(devices),
            })
        }
    }

    impl DeviceFactory for ScriptedFactory {
        fn create(&self, _identity: &DeviceId) -> Result<Arc<dyn DeviceControl>, DeviceError> {
            let mut devices = self.devices.lock().expect("factory lock");
            if devices.is_empty() {
                return Err(DeviceError::Backend("no scripted device left".to_owned()));
            }
            Ok(devices.remove(0))
        }
    }

    fn scripted_registry(count: usize) -> (DeviceRegistry, Vec<Arc<ScriptedDevice>>) {
        let devices: Vec<Arc<ScriptedDevice>> = std::iter::repeat_with(ScriptedDevice::default)
            .map(Arc::new)
            .take(count)
            .collect();
        let registry = DeviceRegistry::new(ScriptedFactory::new(devices.clone()));
        (registry, devices)
    }

    #[tokio::test]
    async fn duplicate_registration_keeps_size_and_updates_owner() {
        let (mut registry, _devices) = scripted_registry(1);

        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1000")
            .await
            .expect("first registration");
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1001")
            .await
            .expect("re-registration");

        assert_eq!(registry.len(), 1);
        let info = registry.default_device().expect("one device");
        assert_eq!(info.owner, "unix:uid=1001");
        assert_eq!(info.state, DeviceState::Active);
    }

    #[tokio::test]
    async fn re_registration_preserves_suspended_state() {
        let (mut registry, _devices) = scripted_registry(1);

        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1000")
            .await
            .expect("registration");
        registry.suspend_all().await.expect("suspend");
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1001")
            .await
            .expect("re-registration");

        let info = registry.default_device().expect("one device");
        assert_eq!(info.state, DeviceState::Suspended);
        assert_eq!(info.owner, "unix:uid=1001");
    }

    #[tokio::test]
    async fn default_device_on_empty_registry_fails() {
        let (registry, _devices) = scripted_registry(0);
        assert_eq!(
            registry.default_device().expect_err("empty registry"),
            RegistryError::NoSuchDevice
        );
    }

    #[tokio::test]
    async fn identities_are_the_registered_set_without_duplicates() {
        let (mut registry, _devices) = scripted_registry(2);

        for (identity, owner) in [
            ("/dev/0", "unix:uid=1"),
            ("/dev/1", "unix:uid=2"),
            ("/dev/0", "unix:uid=3"),
        ] {
            registry
                .register(DeviceId::from(identity), owner)
                .await
                .expect("registration");
        }

        assert_eq!(
            registry.identities(),
            vec![DeviceId::from("/dev/0"), DeviceId::from("/dev/1")]
        );
    }

    #[tokio::test]
    async fn suspend_then_resume_restores_every_device() {
        let (mut registry, _devices) = scripted_registry(2);
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1")
            .await
            .expect("registration");
        registry
            .register(DeviceId::from("/dev/1"), "unix:uid=1")
            .await
            .expect("registration");

        registry.suspend_all().await.expect("suspend");
        assert!(registry
            .list()
            .iter()
            .all(|d| d.state == DeviceState::Suspended));

        registry.resume_all().await.expect("resume");
        assert!(registry.list().iter().all(|d| d.state == DeviceState::Active));
    }

    #[tokio::test]
    async fn suspend_broadcast_aborts_on_first_failure() {
        let (mut registry, devices) = scripted_registry(3);
        for identity in ["/dev/0", "/dev/1", "/dev/2"] {
            registry
                .register(DeviceId::from(identity), "unix:uid=1")
                .await
                .expect("registration");
        }
        devices[1].fail_suspend.store(true, Ordering::SeqCst);

        registry
            .suspend_all()
            .await
            .expect_err("second device refuses");

        // Registry reflects exactly the devices visited before the failure.
        let states: Vec<DeviceState> = registry.list().iter().map(|d| d.state).collect();
        assert_eq!(
            states,
            vec![
                DeviceState::Suspended,
                DeviceState::Active,
                DeviceState::Active
            ]
        );
        // The device after the failing one was never visited.
        assert_eq!(devices[2].suspend_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn resume_broadcast_aborts_on_first_failure() {
        let (mut registry, devices) = scripted_registry(2);
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1")
            .await
            .expect("registration");
        registry
            .register(DeviceId::from("/dev/1"), "unix:uid=1")
            .await
            .expect("registration");
        registry.suspend_all().await.expect("suspend");

        devices[0].fail_resume.store(true, Ordering::SeqCst);
        registry.resume_all().await.expect_err("first device refuses");

        assert!(registry
            .list()
            .iter()
            .all(|d| d.state == DeviceState::Suspended));
        assert_eq!(devices[1].resume_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_re_target_keeps_previous_owner_and_record() {
        let (mut registry, devices) = scripted_registry(1);

        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1000")
            .await
            .expect("first registration");

        devices[0].fail_set_target.store(true, Ordering::SeqCst);
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1001")
            .await
            .expect_err("capability refuses the re-target");

        // The record survives, but the owner only travels through a
        // successful set_target: the refused caller is never recorded.
        assert_eq!(registry.len(), 1);
        let info = registry.default_device().expect("record persists");
        assert_eq!(info.owner, "unix:uid=1000");
        assert_eq!(info.state, DeviceState::Active);
    }

    #[tokio::test]
    async fn failed_initial_target_keeps_record_without_owner() {
        let (mut registry, devices) = scripted_registry(1);
        devices[0].fail_set_target.store(true, Ordering::SeqCst);

        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1000")
            .await
            .expect_err("capability refuses the target");

        // The record was created before the re-target and is not removed.
        assert_eq!(registry.len(), 1);
        let info = registry.default_device().expect("record persists");
        assert_eq!(info.owner, "");

        // A later registration can still claim the device.
        devices[0].fail_set_target.store(false, Ordering::SeqCst);
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1001")
            .await
            .expect("re-registration succeeds");
        assert_eq!(registry.len(), 1);
        let info = registry.default_device().expect("record persists");
        assert_eq!(info.owner, "unix:uid=1001");
    }

    #[tokio::test]
    async fn factory_failure_leaves_registry_empty() {
        let (mut registry, _devices) = scripted_registry(0);
        registry
            .register(DeviceId::from("/dev/0"), "unix:uid=1")
            .await
            .expect_err("factory has no device");
        assert!(registry.is_empty());
    }
}
