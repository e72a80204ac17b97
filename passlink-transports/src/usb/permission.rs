use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use tokio::sync::oneshot;

use super::{DeviceId, UsbHost};

#[derive(Default)]
struct State {
    waiters: HashMap<DeviceId, Vec<oneshot::Sender<bool>>>,
    /// The host whose permission results are being listened to, set while anyone waits.
    receiver: Option<Arc<dyn UsbHost>>,
}

/// Serializes USB permission prompts.
///
/// The platform shows one prompt per device no matter how many requests are waiting on it. Every
/// waiter gets the result of that prompt once the platform reports it through
/// [`PermissionBroker::on_permission_result`].
#[derive(Default)]
pub struct PermissionBroker {
    state: Mutex<State>,
}

impl PermissionBroker {
    /// A broker of its own, mostly useful in tests. Production code shares [`Self::global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The broker shared by the whole process.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<PermissionBroker>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Self::new())).clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for access to `device`, resolving to whether it was granted.
    pub async fn request(&self, host: &Arc<dyn UsbHost>, device: &DeviceId) -> bool {
        if host.has_permission(device) {
            return true;
        }
        let (sender, receiver) = oneshot::channel();
        let (register, prompt) = {
            let mut state = self.lock();
            let register = state.receiver.is_none();
            if register {
                state.receiver = Some(host.clone());
            }
            let waiters = state.waiters.entry(device.clone()).or_default();
            waiters.push(sender);
            (register, waiters.len() == 1)
        };

        if register {
            host.register_permission_receiver();
        }
        if prompt {
            log::info!("requesting permission for USB device {device}");
            host.request_permission(device);
        }
        let mut waiting = Waiting {
            broker: self,
            device,
            receiver,
        };
        // A dropped sender means the broker went away, which is a denial as far as we can tell.
        (&mut waiting.receiver).await.unwrap_or(false)
    }

    /// Forget the waiters of `device` that stopped listening, and stop listening to the platform
    /// once nobody waits anymore.
    fn prune(&self, device: &DeviceId) {
        let receiver = {
            let mut state = self.lock();
            if let Some(waiters) = state.waiters.get_mut(device) {
                waiters.retain(|waiter| !waiter.is_closed());
                if waiters.is_empty() {
                    log::debug!("nobody waits on USB device {device} anymore");
                    state.waiters.remove(device);
                }
            }
            if state.waiters.is_empty() {
                state.receiver.take()
            } else {
                None
            }
        };
        if let Some(receiver) = receiver {
            receiver.unregister_permission_receiver();
        }
    }

    /// The platform answered the prompt for `device`.
    pub fn on_permission_result(&self, device: &DeviceId, granted: bool) {
        let (waiters, receiver) = {
            let mut state = self.lock();
            let waiters = state.waiters.remove(device).unwrap_or_default();
            let receiver = if state.waiters.is_empty() {
                state.receiver.take()
            } else {
                None
            };
            (waiters, receiver)
        };

        log::info!(
            "permission for USB device {device} {}, {} waiting",
            if granted { "granted" } else { "denied" },
            waiters.len()
        );
        for waiter in waiters {
            // the request may have been abandoned meanwhile
            let _ = waiter.send(granted);
        }
        if let Some(receiver) = receiver {
            receiver.unregister_permission_receiver();
        }
    }

    /// Number of devices with a prompt in flight.
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }
}

/// A request in flight. Dropping it before the result arrives withdraws it from the broker.
struct Waiting<'a> {
    broker: &'a PermissionBroker,
    device: &'a DeviceId,
    receiver: oneshot::Receiver<bool>,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.receiver.close();
        self.broker.prune(self.device);
    }
}

impl fmt::Debug for PermissionBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("PermissionBroker")
            .field("pending", &state.waiters.keys().collect::<Vec<_>>())
            .field("listening", &state.receiver.is_some())
            .finish()
    }
}
