// ── Device registry ──
//
// Keeps the local device, call and group lists in step with the
// controller. Push notifications apply incrementally; a bulk pull
// replaces everything. At most one bulk pull runs at a time and a failed
// pull retries itself after a delay.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use doorlink_api::{PushEvent, RegistrationElement, Transport};

use crate::bus::{EventBus, SubscriptionId};
use crate::command::await_completion;
use crate::config::{CommandPollConfig, ControllerConfig};
use crate::error::CoreError;
use crate::model::{CallElement, Device, Group};
use crate::store::Collections;

/// Result of [`DeviceRegistry::retrieve_registered_devices`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The device list was replaced with `devices` entries.
    Refreshed { devices: usize },
    /// Another refresh was already running; this request was collapsed
    /// into it.
    AlreadyInProgress,
    /// The pull failed. The error went out on the exception channel.
    Failed,
}

// ── DeviceRegistry ───────────────────────────────────────────────────

/// Authoritative local view of registered devices.
///
/// Cheaply cloneable; every clone shares the same lists and tasks.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    transport: Arc<dyn Transport>,
    bus: Arc<EventBus>,
    store: Arc<Collections>,
    operator_dirno: String,
    command_poll: CommandPollConfig,
    refresh_retry_interval: Duration,
    refresh_in_progress: Mutex<bool>,
    retry_timer: Mutex<Option<JoinHandle<()>>>,
    retrieval_subscription: Mutex<Option<SubscriptionId>>,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears the in-flight flag when the refresh that set it finishes,
/// however it finishes.
struct RefreshGuard<'a> {
    flag: &'a Mutex<bool>,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        *lock(self.flag) = false;
    }
}

impl DeviceRegistry {
    pub fn new(transport: Arc<dyn Transport>, bus: Arc<EventBus>, config: &ControllerConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                transport,
                bus,
                store: Arc::new(Collections::new()),
                operator_dirno: config.operator_dirno.clone(),
                command_poll: config.command_poll.clone(),
                refresh_retry_interval: config.refresh_retry_interval,
                refresh_in_progress: Mutex::new(false),
                retry_timer: Mutex::new(None),
                retrieval_subscription: Mutex::new(None),
                cancel: CancellationToken::new(),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Read access to the device, call and group lists.
    pub fn collections(&self) -> &Arc<Collections> {
        &self.inner.store
    }

    pub fn device(&self, dirno: &str) -> Option<Arc<Device>> {
        self.inner.store.device_by_dirno(dirno)
    }

    pub fn devices(&self) -> Arc<Vec<Arc<Device>>> {
        self.inner.store.devices_snapshot()
    }

    pub fn groups(&self) -> Arc<Vec<Arc<Group>>> {
        self.inner.store.groups_snapshot()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Begin listening for push notifications and for refresh requests
    /// on the bus. Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let runtime = Handle::current();
        let rx = self.inner.transport.subscribe();
        let listener = runtime.spawn(push_listener(self.clone(), rx, self.inner.cancel.clone()));
        lock(&self.inner.task_handles).push(listener);

        // Weak: the bus outlives the registry and must not keep it alive.
        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let id = self.inner.bus.retrieval_start().subscribe(move |_| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if inner.cancel.is_cancelled() {
                return;
            }
            let registry = DeviceRegistry { inner };
            runtime.spawn(async move {
                registry.retrieve_registered_devices().await;
            });
        });

        if let Some(previous) = lock(&self.inner.retrieval_subscription).replace(id) {
            self.inner.bus.retrieval_start().unsubscribe(previous);
        }
        debug!("device registry started");
    }

    /// Stop background work. Lists keep their last contents.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.cancel_retry_timer();
        if let Some(id) = lock(&self.inner.retrieval_subscription).take() {
            self.inner.bus.retrieval_start().unsubscribe(id);
        }
        for handle in lock(&self.inner.task_handles).drain(..) {
            handle.abort();
        }
        debug!("device registry stopped");
    }

    // ── Push handling ────────────────────────────────────────────────

    /// Apply a registration push: insert or replace the device keyed by
    /// its address, then announce the change.
    pub fn handle_registration_push(&self, element: RegistrationElement) {
        let device = Device::from(element);
        if device.address.is_empty() {
            warn!(dirno = %device.dirno, "registration without an address ignored");
            return;
        }

        let address = device.address.clone();
        let dirno = device.dirno.clone();
        let is_new = self.inner.store.upsert_device(device);
        debug!(%address, %dirno, is_new, "registration applied");
        self.inner.bus.device_list_changed().notify();
    }

    /// Apply a call push: forward it, track it in the active-call list
    /// and project its state onto every participating device.
    pub fn handle_call_push(&self, element: doorlink_api::CallElement) {
        let call = match CallElement::try_from(element) {
            Ok(call) => call,
            Err(err) => {
                self.inner.bus.raise(err);
                return;
            }
        };

        self.inner.store.track_call(&call);
        self.inner.bus.call_event().publish(&call);
        self.project_call_state(&call);
    }

    /// Set the call state of every device taking part in `call`.
    ///
    /// Devices not in the list are left alone; nothing is created.
    /// Publishes `device_list_changed` exactly once. Returns the number
    /// of devices updated.
    pub fn project_call_state(&self, call: &CallElement) -> usize {
        let updated = self.inner.store.project_call(call);
        debug!(
            call_id = %call.call_id,
            state = %call.state,
            updated,
            "call state projected"
        );
        self.inner.bus.device_list_changed().notify();
        updated
    }

    fn dispatch(&self, event: &PushEvent) {
        match event {
            PushEvent::Registration(element) => self.handle_registration_push(element.clone()),
            PushEvent::Call(element) => self.handle_call_push(element.clone()),
            PushEvent::Gpio { .. } | PushEvent::Connection(_) | PushEvent::Log(_) => {}
        }
    }

    // ── Bulk refresh ─────────────────────────────────────────────────

    fn try_begin_refresh(&self) -> Option<RefreshGuard<'_>> {
        let mut busy = lock(&self.inner.refresh_in_progress);
        if *busy {
            return None;
        }
        *busy = true;
        Some(RefreshGuard {
            flag: &self.inner.refresh_in_progress,
        })
    }

    pub fn is_refreshing(&self) -> bool {
        *lock(&self.inner.refresh_in_progress)
    }

    /// Pull the full device list and replace the local one.
    ///
    /// A request arriving while a pull is in flight is collapsed into it.
    /// Every call, collapsed or not, ends with one `retrieval_end`.
    pub async fn retrieve_registered_devices(&self) -> RefreshOutcome {
        let bus = &self.inner.bus;
        let Some(guard) = self.try_begin_refresh() else {
            debug!("device refresh already in flight");
            bus.retrieval_end().notify();
            return RefreshOutcome::AlreadyInProgress;
        };

        let outcome = match self.pull_snapshot().await {
            Ok((devices, groups)) => {
                let count = devices.len();
                self.cancel_retry_timer();
                self.inner.store.replace_devices(devices);
                let groups_replaced = groups.is_some();
                if let Some(groups) = groups {
                    self.inner.store.replace_groups(groups);
                }
                info!(devices = count, groups_replaced, "device list refreshed");

                bus.queues_and_calls_sync().notify();
                bus.device_list_changed().notify();
                if groups_replaced {
                    bus.groups_list_changed().notify();
                }
                RefreshOutcome::Refreshed { devices: count }
            }
            Err(err) => {
                // A dead session is the supervisor's to fix; it requests
                // a fresh pull once the link is back.
                let retry = !matches!(err, CoreError::TransportUnavailable);
                bus.diagnostic()
                    .publish(&format!("device refresh failed: {err}"));
                bus.raise(err);
                if retry {
                    self.schedule_retry();
                }
                RefreshOutcome::Failed
            }
        };

        drop(guard);
        bus.retrieval_end().notify();
        outcome
    }

    async fn pull_snapshot(&self) -> Result<(Vec<Device>, Option<Vec<Group>>), CoreError> {
        let transport = &self.inner.transport;
        let elements = transport.list_registered_devices().await?;

        // Later entries win for a repeated address.
        let mut seen = HashSet::new();
        let mut devices: Vec<Device> = elements
            .into_iter()
            .rev()
            .map(Device::from)
            .filter(|d| !d.address.is_empty() && seen.insert(d.address.clone()))
            .collect();
        devices.reverse();

        let groups = match transport.list_groups().await {
            Ok(groups) => Some(groups.into_iter().map(Group::from).collect()),
            Err(e) => {
                warn!(error = %e, "group list unavailable; keeping previous groups");
                None
            }
        };

        Ok((devices, groups))
    }

    fn schedule_retry(&self) {
        let interval = self.inner.refresh_retry_interval;
        if interval.is_zero() || self.inner.cancel.is_cancelled() {
            return;
        }

        let registry = self.clone();
        let cancel = self.inner.cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(interval) => {
                    debug!("retrying device refresh");
                    registry.retrieve_registered_devices().await;
                }
            }
        });

        if let Some(previous) = lock(&self.inner.retry_timer).replace(handle) {
            previous.abort();
        }
    }

    fn cancel_retry_timer(&self) {
        if let Some(timer) = lock(&self.inner.retry_timer).take() {
            timer.abort();
        }
    }

    pub fn retry_pending(&self) -> bool {
        lock(&self.inner.retry_timer)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    // ── Commands ─────────────────────────────────────────────────────

    fn require_device(&self, dirno: &str) -> Result<Arc<Device>, CoreError> {
        self.inner
            .store
            .device_by_dirno(dirno)
            .ok_or_else(|| CoreError::DeviceNotFound {
                identifier: dirno.to_owned(),
            })
    }

    /// Press `key` on the device's keypad and wait for the outcome.
    pub async fn simulate_key_press(&self, dirno: &str, key: &str) -> Result<(), CoreError> {
        self.require_device(dirno)?;
        let pending = self.inner.transport.simulate_key_press(dirno, key)?;
        await_completion("simulate_key_press", &pending, &self.inner.command_poll).await
    }

    /// Play the test tone on the device and wait for the outcome.
    pub async fn initiate_tone_test(&self, dirno: &str) -> Result<(), CoreError> {
        self.require_device(dirno)?;
        let pending = self.inner.transport.tone_test(dirno)?;
        await_completion("tone_test", &pending, &self.inner.command_poll).await
    }

    pub async fn open_door(&self, dirno: &str) -> Result<(), CoreError> {
        self.require_device(dirno)?;
        let pending = self.inner.transport.open_door(dirno)?;
        await_completion("open_door", &pending, &self.inner.command_poll).await
    }

    /// Place a call from `from_dirno` to a device or group.
    pub async fn post_call(&self, from_dirno: &str, to_dirno: &str) -> Result<(), CoreError> {
        let is_group = self
            .inner
            .store
            .groups_snapshot()
            .iter()
            .any(|g| g.id == to_dirno);
        if !is_group {
            self.require_device(to_dirno)?;
        }
        let pending = self.inner.transport.post_call(from_dirno, to_dirno)?;
        await_completion("post_call", &pending, &self.inner.command_poll).await
    }

    /// [`post_call`](Self::post_call) from the operator's own directory
    /// number.
    pub async fn call_from_operator(&self, to_dirno: &str) -> Result<(), CoreError> {
        if self.inner.operator_dirno.is_empty() {
            return Err(CoreError::Internal(
                "no operator directory number configured".into(),
            ));
        }
        let operator = self.inner.operator_dirno.clone();
        self.post_call(&operator, to_dirno).await
    }

    pub async fn delete_call(&self, call_id: &str) -> Result<(), CoreError> {
        let pending = self.inner.transport.delete_call(call_id)?;
        await_completion("delete_call", &pending, &self.inner.command_poll).await
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn push_listener(
    registry: DeviceRegistry,
    mut rx: tokio::sync::broadcast::Receiver<Arc<PushEvent>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Ok(event) => registry.dispatch(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "registry push listener lagged; requesting full refresh");
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        registry.retrieve_registered_devices().await;
                    });
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("registry push listener exited");
}
